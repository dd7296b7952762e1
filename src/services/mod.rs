pub mod toplevel;
