use super::{
    object::{ToplevelHandle, ToplevelObject},
    types::{FieldUpdate, Request, ToplevelEvent, ToplevelId, ToplevelSnapshot},
};
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};

/// Requests raised by observers while the registry is notifying them.
/// They are sent on the next call to [`ToplevelRegistry::flush_deferred`].
#[derive(Debug, Default)]
pub struct RequestQueue(VecDeque<(ToplevelId, Request)>);

impl RequestQueue {
    pub fn push(&mut self, id: ToplevelId, request: Request) {
        self.0.push_back((id, request));
    }
}

pub trait ToplevelObserver<H: ToplevelHandle> {
    /// The toplevel received its first update. Its committed snapshot is not valid yet.
    fn created(&mut self, _toplevel: &ToplevelObject<H>, _requests: &mut RequestQueue) {}

    fn synced(&mut self, toplevel: &ToplevelObject<H>, requests: &mut RequestQueue);

    fn closed(
        &mut self,
        id: ToplevelId,
        last_known: Option<&ToplevelSnapshot>,
        requests: &mut RequestQueue,
    );

    /// The compositor will not send any more toplevels.
    fn finished(&mut self) {}
}

pub struct ToplevelRegistry<H: ToplevelHandle> {
    manager_version: u32,
    objects: HashMap<ToplevelId, ToplevelObject<H>>,
    announced: HashMap<ToplevelId, ToplevelObject<H>>,
    seat: Option<H::Seat>,
    observers: Vec<Box<dyn ToplevelObserver<H>>>,
    deferred: RequestQueue,
    dedup_synced: bool,
    finished: bool,
}

impl<H: ToplevelHandle> ToplevelRegistry<H> {
    pub fn new(manager_version: u32) -> Self {
        Self {
            manager_version,
            objects: HashMap::new(),
            announced: HashMap::new(),
            seat: None,
            observers: Vec::new(),
            deferred: RequestQueue::default(),
            dedup_synced: false,
            finished: false,
        }
    }

    /// Skip `synced` notifications when a `done` leaves the snapshot unchanged.
    pub fn with_dedup_synced(mut self, dedup_synced: bool) -> Self {
        self.dedup_synced = dedup_synced;
        self
    }

    pub fn with_seat(mut self, seat: Option<H::Seat>) -> Self {
        self.seat = seat;
        self
    }

    pub fn subscribe(&mut self, observer: Box<dyn ToplevelObserver<H>>) {
        self.observers.push(observer);
    }

    pub fn manager_version(&self) -> u32 {
        self.manager_version
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, id: ToplevelId) -> Option<&ToplevelObject<H>> {
        self.objects.get(&id)
    }

    /// Live toplevels that have been synced at least once, ordered by id.
    pub fn synced(&self) -> impl Iterator<Item = &ToplevelObject<H>> {
        let mut toplevels = self
            .objects
            .values()
            .filter(|toplevel| toplevel.committed().is_some())
            .collect::<Vec<_>>();
        toplevels.sort_by_key(|toplevel| toplevel.id());
        toplevels.into_iter()
    }

    pub fn handle(&mut self, event: ToplevelEvent<H>) {
        match event {
            ToplevelEvent::Announced { id, handle } => self.object_announced(id, handle),
            ToplevelEvent::Field { id, update } => self.field_update(id, update),
            ToplevelEvent::Done { id } => self.batch_done(id),
            ToplevelEvent::Closed { id } => self.object_closed(id),
            ToplevelEvent::Finished => self.manager_finished(),
        }
    }

    pub fn object_announced(&mut self, id: ToplevelId, handle: H) {
        if self.objects.contains_key(&id) || self.announced.contains_key(&id) {
            warn!(target: "ToplevelRegistry::object_announced", "Toplevel {id} announced twice, keeping the first one");
            return;
        }

        debug!(target: "ToplevelRegistry::object_announced", "New toplevel {id}");
        self.announced.insert(id, ToplevelObject::new(id, handle));
    }

    pub fn field_update(&mut self, id: ToplevelId, update: FieldUpdate) {
        self.promote(id);

        match self.objects.get_mut(&id) {
            Some(toplevel) => toplevel.apply_field_update(update),
            None => {
                debug!(target: "ToplevelRegistry::field_update", "Ignoring {update:?} for unknown toplevel {id}");
            }
        }
    }

    pub fn batch_done(&mut self, id: ToplevelId) {
        self.promote(id);

        let Self {
            objects,
            observers,
            deferred,
            dedup_synced,
            ..
        } = self;

        let Some(toplevel) = objects.get_mut(&id) else {
            debug!(target: "ToplevelRegistry::batch_done", "Ignoring done for unknown toplevel {id}");
            return;
        };

        let changed = toplevel.has_pending_changes();
        toplevel.commit();

        if *dedup_synced && !changed {
            debug!(target: "ToplevelRegistry::batch_done", "Toplevel {id} unchanged, skipping sync notification");
            return;
        }

        let toplevel = &*toplevel;
        for observer in observers.iter_mut() {
            observer.synced(toplevel, deferred);
        }
    }

    pub fn object_closed(&mut self, id: ToplevelId) {
        if let Some(mut toplevel) = self.announced.remove(&id) {
            debug!(target: "ToplevelRegistry::object_closed", "Toplevel {id} closed before its first update");
            toplevel.mark_closed();
            toplevel.handle().release();
            return;
        }

        let Some(mut toplevel) = self.objects.remove(&id) else {
            debug!(target: "ToplevelRegistry::object_closed", "Ignoring close for unknown toplevel {id}");
            return;
        };

        toplevel.mark_closed();
        debug!(target: "ToplevelRegistry::object_closed", "Toplevel {id} closed");

        for observer in self.observers.iter_mut() {
            observer.closed(id, toplevel.committed(), &mut self.deferred);
        }

        toplevel.handle().release();
    }

    pub fn manager_finished(&mut self) {
        if self.finished {
            return;
        }

        info!(target: "ToplevelRegistry::manager_finished", "Toplevel manager finished");
        self.finished = true;

        for observer in self.observers.iter_mut() {
            observer.finished();
        }
    }

    /// Sends `request` on a live toplevel. Unknown or closed ids are a no-op.
    pub fn request(&self, id: ToplevelId, request: Request) {
        match self.objects.get(&id) {
            Some(toplevel) => toplevel.send(request, self.seat.as_ref()),
            None => {
                warn!(target: "ToplevelRegistry::request", "Dropping {request:?} for unknown toplevel {id}");
            }
        }
    }

    /// Sends the requests observers queued during earlier notifications.
    pub fn flush_deferred(&mut self) -> usize {
        let RequestQueue(requests) = std::mem::take(&mut self.deferred);
        let count = requests.len();
        for (id, request) in requests {
            self.request(id, request);
        }
        count
    }

    fn promote(&mut self, id: ToplevelId) {
        let Some(mut toplevel) = self.announced.remove(&id) else {
            return;
        };
        toplevel.mark_syncing();

        let Self {
            objects,
            observers,
            deferred,
            ..
        } = self;

        let toplevel = objects.entry(id).or_insert(toplevel);
        for observer in observers.iter_mut() {
            observer.created(toplevel, deferred);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::toplevel::{
        object::{
            Phase,
            testing::{RecordingHandle, SentLog},
        },
        types::StateFlag,
    };
    use std::{cell::RefCell, collections::BTreeSet, rc::Rc};

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Created(ToplevelId),
        Synced(ToplevelId, ToplevelSnapshot),
        Closed(ToplevelId, Option<ToplevelSnapshot>),
        Finished,
    }

    type SeenLog = Rc<RefCell<Vec<Seen>>>;

    #[derive(Default)]
    struct Recorder {
        seen: SeenLog,
        on_synced: Option<Request>,
    }

    impl ToplevelObserver<RecordingHandle> for Recorder {
        fn created(&mut self, toplevel: &ToplevelObject<RecordingHandle>, _: &mut RequestQueue) {
            assert!(toplevel.committed().is_none());
            self.seen.borrow_mut().push(Seen::Created(toplevel.id()));
        }

        fn synced(
            &mut self,
            toplevel: &ToplevelObject<RecordingHandle>,
            requests: &mut RequestQueue,
        ) {
            let snapshot = toplevel.committed().cloned().unwrap_or_default();
            self.seen
                .borrow_mut()
                .push(Seen::Synced(toplevel.id(), snapshot));
            if let Some(request) = self.on_synced {
                requests.push(toplevel.id(), request);
            }
        }

        fn closed(
            &mut self,
            id: ToplevelId,
            last_known: Option<&ToplevelSnapshot>,
            _: &mut RequestQueue,
        ) {
            self.seen
                .borrow_mut()
                .push(Seen::Closed(id, last_known.cloned()));
        }

        fn finished(&mut self) {
            self.seen.borrow_mut().push(Seen::Finished);
        }
    }

    struct Fixture {
        registry: ToplevelRegistry<RecordingHandle>,
        seen: SeenLog,
        sent: SentLog,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_recorder(Recorder::default(), false)
        }

        fn with_recorder(recorder: Recorder, dedup_synced: bool) -> Self {
            let seen = recorder.seen.clone();
            let mut registry = ToplevelRegistry::new(3)
                .with_dedup_synced(dedup_synced)
                .with_seat(Some(()));
            registry.subscribe(Box::new(recorder));
            Self {
                registry,
                seen,
                sent: SentLog::default(),
            }
        }

        fn announce(&mut self, id: u32) {
            let handle = RecordingHandle::new(id, &self.sent);
            self.registry.handle(ToplevelEvent::Announced {
                id: ToplevelId(id),
                handle,
            });
        }

        fn update(&mut self, id: u32, update: FieldUpdate) {
            self.registry.handle(ToplevelEvent::Field {
                id: ToplevelId(id),
                update,
            });
        }

        fn done(&mut self, id: u32) {
            self.registry.handle(ToplevelEvent::Done { id: ToplevelId(id) });
        }

        fn close(&mut self, id: u32) {
            self.registry
                .handle(ToplevelEvent::Closed { id: ToplevelId(id) });
        }

        fn seen(&self) -> Vec<Seen> {
            self.seen.borrow().clone()
        }
    }

    fn title(value: &str) -> FieldUpdate {
        FieldUpdate::Title(value.to_owned())
    }

    fn snapshot(title: &str, states: &[StateFlag]) -> ToplevelSnapshot {
        ToplevelSnapshot {
            title: Some(title.to_owned()),
            states: states.iter().copied().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn editor_lifecycle() {
        let mut fixture = Fixture::new();

        fixture.announce(7);
        fixture.update(7, title("Editor"));
        fixture.update(7, FieldUpdate::States(BTreeSet::from([StateFlag::Maximized])));
        fixture.done(7);

        let expected = snapshot("Editor", &[StateFlag::Maximized]);
        assert_eq!(
            fixture.seen(),
            vec![
                Seen::Created(ToplevelId(7)),
                Seen::Synced(ToplevelId(7), expected.clone()),
            ]
        );
        assert_eq!(fixture.registry.len(), 1);

        fixture.close(7);

        assert_eq!(
            fixture.seen().last(),
            Some(&Seen::Closed(ToplevelId(7), Some(expected)))
        );
        assert_eq!(fixture.registry.len(), 0);
        assert!(fixture.registry.get(ToplevelId(7)).is_none());
    }

    #[test]
    fn announced_toplevel_is_not_live_until_updated() {
        let mut fixture = Fixture::new();

        fixture.announce(1);

        assert!(fixture.seen().is_empty());
        assert!(fixture.registry.is_empty());

        fixture.update(1, title("a"));

        assert_eq!(fixture.seen(), vec![Seen::Created(ToplevelId(1))]);
        assert_eq!(
            fixture.registry.get(ToplevelId(1)).map(|t| t.phase()),
            Some(Phase::Syncing)
        );
    }

    #[test]
    fn created_fires_once_before_every_sync() {
        let mut fixture = Fixture::new();

        fixture.announce(1);
        for name in ["a", "b", "c"] {
            fixture.update(1, title(name));
            fixture.done(1);
        }

        let seen = fixture.seen();
        assert_eq!(seen[0], Seen::Created(ToplevelId(1)));
        assert_eq!(
            seen.iter()
                .filter(|s| matches!(s, Seen::Created(_)))
                .count(),
            1
        );
        assert_eq!(
            seen.iter()
                .filter(|s| matches!(s, Seen::Synced(..)))
                .count(),
            3
        );
        assert_eq!(
            seen.last(),
            Some(&Seen::Synced(ToplevelId(1), snapshot("c", &[])))
        );
    }

    #[test]
    fn last_write_wins_and_untouched_fields_survive() {
        let mut fixture = Fixture::new();

        fixture.announce(1);
        fixture.update(1, title("first"));
        fixture.update(1, FieldUpdate::AppId("term".to_owned()));
        fixture.done(1);
        fixture.update(1, title("second"));
        fixture.update(1, title("third"));
        fixture.done(1);

        let expected = ToplevelSnapshot {
            title: Some("third".to_owned()),
            app_id: Some("term".to_owned()),
            ..Default::default()
        };
        assert_eq!(
            fixture.seen().last(),
            Some(&Seen::Synced(ToplevelId(1), expected))
        );
    }

    #[test]
    fn interleaved_batches_do_not_mix() {
        let mut fixture = Fixture::new();
        fixture.announce(1);
        fixture.announce(2);

        fixture.update(1, title("A1"));
        fixture.update(2, title("B1"));
        fixture.update(1, FieldUpdate::AppId("A2".to_owned()));
        fixture.done(1);

        let synced_a = ToplevelSnapshot {
            title: Some("A1".to_owned()),
            app_id: Some("A2".to_owned()),
            ..Default::default()
        };
        assert_eq!(
            fixture.seen().last(),
            Some(&Seen::Synced(ToplevelId(1), synced_a))
        );
        assert!(
            fixture
                .registry
                .get(ToplevelId(2))
                .and_then(|t| t.committed())
                .is_none()
        );

        fixture.update(2, FieldUpdate::AppId("B2".to_owned()));
        fixture.done(2);

        let synced_b = ToplevelSnapshot {
            title: Some("B1".to_owned()),
            app_id: Some("B2".to_owned()),
            ..Default::default()
        };
        assert_eq!(
            fixture.seen().last(),
            Some(&Seen::Synced(ToplevelId(2), synced_b))
        );
    }

    #[test]
    fn closed_fires_once_and_later_messages_are_ignored() {
        let mut fixture = Fixture::new();
        fixture.announce(3);
        fixture.update(3, title("x"));
        fixture.done(3);

        fixture.close(3);
        fixture.close(3);
        fixture.update(3, title("ghost"));
        fixture.done(3);

        let seen = fixture.seen();
        assert_eq!(
            seen.iter()
                .filter(|s| matches!(s, Seen::Closed(..)))
                .count(),
            1
        );
        assert!(matches!(seen.last(), Some(Seen::Closed(..))));
        assert!(fixture.registry.is_empty());
    }

    #[test]
    fn close_before_done_reports_no_snapshot() {
        let mut fixture = Fixture::new();
        fixture.announce(4);
        fixture.update(4, title("half"));

        fixture.close(4);

        assert_eq!(
            fixture.seen(),
            vec![
                Seen::Created(ToplevelId(4)),
                Seen::Closed(ToplevelId(4), None),
            ]
        );
    }

    #[test]
    fn close_before_first_update_is_silent() {
        let mut fixture = Fixture::new();
        fixture.announce(5);

        fixture.close(5);
        fixture.update(5, title("late"));

        assert!(fixture.seen().is_empty());
        assert!(fixture.registry.is_empty());
    }

    #[test]
    fn done_without_updates_promotes_announced_toplevel() {
        let mut fixture = Fixture::new();
        fixture.announce(6);

        fixture.done(6);

        assert_eq!(
            fixture.seen(),
            vec![
                Seen::Created(ToplevelId(6)),
                Seen::Synced(ToplevelId(6), ToplevelSnapshot::default()),
            ]
        );
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut fixture = Fixture::new();

        fixture.done(99);
        fixture.close(99);
        fixture.update(99, title("nobody"));

        assert!(fixture.seen().is_empty());
        assert!(fixture.registry.is_empty());
    }

    #[test]
    fn duplicate_announce_keeps_first_handle() {
        let mut fixture = Fixture::new();
        fixture.announce(8);
        fixture.update(8, title("kept"));
        fixture.announce(8);
        fixture.done(8);

        assert_eq!(
            fixture.seen(),
            vec![
                Seen::Created(ToplevelId(8)),
                Seen::Synced(ToplevelId(8), snapshot("kept", &[])),
            ]
        );
    }

    #[test]
    fn requests_after_close_send_nothing() {
        let mut fixture = Fixture::new();
        fixture.announce(7);
        fixture.update(7, title("Editor"));
        fixture.done(7);
        fixture.close(7);

        fixture
            .registry
            .request(ToplevelId(7), Request::SetMaximized(true));

        assert!(fixture.sent.borrow().is_empty());
    }

    #[test]
    fn requests_reach_live_toplevels() {
        let mut fixture = Fixture::new();
        fixture.announce(2);
        fixture.done(2);

        fixture.registry.request(ToplevelId(2), Request::Activate);
        fixture.registry.request(ToplevelId(2), Request::Close);

        assert_eq!(
            *fixture.sent.borrow(),
            vec![
                (ToplevelId(2), Request::Activate),
                (ToplevelId(2), Request::Close)
            ]
        );
    }

    #[test]
    fn double_close_request_yields_one_notification() {
        let mut fixture = Fixture::new();
        fixture.announce(1);
        fixture.done(1);

        fixture.registry.request(ToplevelId(1), Request::Close);
        fixture.registry.request(ToplevelId(1), Request::Close);
        fixture.close(1);
        fixture.close(1);

        let closed = fixture
            .seen()
            .into_iter()
            .filter(|s| matches!(s, Seen::Closed(..)))
            .count();
        assert_eq!(closed, 1);
        assert_eq!(fixture.sent.borrow().len(), 2);
    }

    #[test]
    fn observer_requests_are_deferred_until_flush() {
        let recorder = Recorder {
            on_synced: Some(Request::SetMinimized(true)),
            ..Default::default()
        };
        let mut fixture = Fixture::with_recorder(recorder, false);
        fixture.announce(1);
        fixture.update(1, title("a"));
        fixture.done(1);

        assert!(fixture.sent.borrow().is_empty());

        assert_eq!(fixture.registry.flush_deferred(), 1);
        assert_eq!(
            *fixture.sent.borrow(),
            vec![(ToplevelId(1), Request::SetMinimized(true))]
        );
        assert_eq!(fixture.registry.flush_deferred(), 0);
    }

    #[test]
    fn deferred_request_for_closed_toplevel_is_dropped() {
        let recorder = Recorder {
            on_synced: Some(Request::Close),
            ..Default::default()
        };
        let mut fixture = Fixture::with_recorder(recorder, false);
        fixture.announce(1);
        fixture.done(1);
        fixture.close(1);

        fixture.registry.flush_deferred();

        assert!(fixture.sent.borrow().is_empty());
    }

    #[test]
    fn dedup_skips_unchanged_snapshots() {
        let mut fixture = Fixture::with_recorder(Recorder::default(), true);
        fixture.announce(1);
        fixture.update(1, title("same"));
        fixture.done(1);
        fixture.update(1, title("same"));
        fixture.done(1);
        fixture.done(1);
        fixture.update(1, title("new"));
        fixture.done(1);

        let synced = fixture
            .seen()
            .into_iter()
            .filter(|s| matches!(s, Seen::Synced(..)))
            .collect::<Vec<_>>();
        assert_eq!(
            synced,
            vec![
                Seen::Synced(ToplevelId(1), snapshot("same", &[])),
                Seen::Synced(ToplevelId(1), snapshot("new", &[])),
            ]
        );
    }

    #[test]
    fn without_dedup_every_done_notifies() {
        let mut fixture = Fixture::new();
        fixture.announce(1);
        fixture.done(1);
        fixture.done(1);

        let synced = fixture
            .seen()
            .into_iter()
            .filter(|s| matches!(s, Seen::Synced(..)))
            .count();
        assert_eq!(synced, 2);
    }

    #[test]
    fn synced_lists_only_committed_toplevels_in_id_order() {
        let mut fixture = Fixture::new();
        fixture.announce(9);
        fixture.announce(2);
        fixture.announce(5);
        fixture.done(9);
        fixture.done(2);
        fixture.update(5, title("pending"));

        let ids = fixture
            .registry
            .synced()
            .map(|t| t.id())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![ToplevelId(2), ToplevelId(9)]);
        assert_eq!(fixture.registry.len(), 3);
    }

    #[test]
    fn finished_is_reported_once() {
        let mut fixture = Fixture::new();

        fixture.registry.handle(ToplevelEvent::Finished);
        fixture.registry.handle(ToplevelEvent::Finished);

        assert!(fixture.registry.is_finished());
        assert_eq!(fixture.seen(), vec![Seen::Finished]);
        assert_eq!(fixture.registry.manager_version(), 3);
    }
}
