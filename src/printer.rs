use itertools::Itertools;
use serde::Serialize;
use std::io::Write;

use crate::{
    config::OutputFormat,
    services::toplevel::{
        RequestQueue, StateFlag, ToplevelHandle, ToplevelId, ToplevelObject, ToplevelObserver,
        ToplevelSnapshot,
    },
};

#[derive(Serialize, Debug)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Line<'a> {
    Created {
        id: ToplevelId,
    },
    Synced {
        id: ToplevelId,
        toplevel: &'a ToplevelSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    Closed {
        id: ToplevelId,
        last_known: Option<&'a ToplevelSnapshot>,
    },
    Finished,
}

fn describe(snapshot: &ToplevelSnapshot) -> String {
    let mut text = format!(
        "{:?} app={}",
        snapshot.title.as_deref().unwrap_or_default(),
        snapshot.app_id.as_deref().unwrap_or("-"),
    );
    if !snapshot.states.is_empty() {
        text.push_str(&format!(" states={}", snapshot.states_label()));
    }
    if !snapshot.outputs.is_empty() {
        text.push_str(&format!(" outputs={}", snapshot.outputs.iter().join(",")));
    }
    if let Some(parent) = snapshot.parent {
        text.push_str(&format!(" parent={parent}"));
    }
    text
}

/// `None` when the line could not be serialized; the failure is logged.
pub fn render(format: OutputFormat, line: &Line) -> Option<String> {
    let text = match format {
        OutputFormat::Json => match serde_json::to_string(line) {
            Ok(text) => text,
            Err(err) => {
                log::warn!("Failed to serialize {line:?}: {err}");
                return None;
            }
        },
        OutputFormat::Text => match line {
            Line::Created { id } => format!("created {id}"),
            Line::Synced { id, toplevel } => format!("synced  {id} {}", describe(toplevel)),
            Line::Closed { id, last_known } => match last_known {
                Some(snapshot) => format!("closed  {id} {}", describe(snapshot)),
                None => format!("closed  {id}"),
            },
            Line::Finished => "finished".to_owned(),
        },
    };
    Some(text)
}

/// Row printed by `list`: one line per synced toplevel, the focused one marked with `*`.
pub fn render_listing(
    format: OutputFormat,
    id: ToplevelId,
    snapshot: &ToplevelSnapshot,
) -> Option<String> {
    match format {
        OutputFormat::Json => render(
            format,
            &Line::Synced {
                id,
                toplevel: snapshot,
            },
        ),
        OutputFormat::Text => {
            let marker = if snapshot.has_state(StateFlag::Activated) {
                '*'
            } else {
                ' '
            };
            Some(format!("{marker}{id:>6}  {}", describe(snapshot)))
        }
    }
}

/// Observer that prints every lifecycle notification as it happens.
pub struct WatchPrinter<W: Write> {
    format: OutputFormat,
    out: W,
}

impl<W: Write> WatchPrinter<W> {
    pub fn new(format: OutputFormat, out: W) -> Self {
        Self { format, out }
    }

    fn print(&mut self, line: Line) {
        let text = render(self.format, &line);
        self.emit(text);
    }

    fn emit(&mut self, text: Option<String>) {
        let Some(text) = text else {
            return;
        };
        if let Err(err) = writeln!(self.out, "{text}").and_then(|_| self.out.flush()) {
            log::warn!(target: "WatchPrinter::print", "Failed to write event: {err}");
        }
    }
}

impl<H: ToplevelHandle, W: Write> ToplevelObserver<H> for WatchPrinter<W> {
    fn created(&mut self, toplevel: &ToplevelObject<H>, _requests: &mut RequestQueue) {
        self.print(Line::Created { id: toplevel.id() });
    }

    fn synced(&mut self, toplevel: &ToplevelObject<H>, _requests: &mut RequestQueue) {
        if let Some(snapshot) = toplevel.committed() {
            self.print(Line::Synced {
                id: toplevel.id(),
                toplevel: snapshot,
            });
        }
    }

    fn closed(
        &mut self,
        id: ToplevelId,
        last_known: Option<&ToplevelSnapshot>,
        _requests: &mut RequestQueue,
    ) {
        self.print(Line::Closed { id, last_known });
    }

    fn finished(&mut self) {
        self.print(Line::Finished);
    }
}
