/// Guild Engine — Update notifications
///
/// Observer list for consumers of a replica (typically a UI). Subscribers
/// hold a `SubscriptionId` and unsubscribe when they go away; nothing here
/// is process-global.

use bitflags::bitflags;

use crate::domain::GuildId;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UpdateKind: u32 {
        const GUILD_ADDED = 1 << 0;
        const GUILD_REMOVED = 1 << 1;
        /// Role table changed, or a member's role changed.
        const ROLES_CHANGED = 1 << 2;
        /// Name or colour changed.
        const INFO_CHANGED = 1 << 3;
        /// Members or invites changed.
        const MEMBERS_CHANGED = 1 << 4;
        const METRICS_CHANGED = 1 << 5;
        const CLAIMS_CHANGED = 1 << 6;
        const FULL_SYNC = 1 << 7;
    }
}

pub trait GuildObserver: Send {
    fn on_update(&mut self, kind: UpdateKind, guild: Option<GuildId>);
}

impl<F> GuildObserver for F
where
    F: FnMut(UpdateKind, Option<GuildId>) + Send,
{
    fn on_update(&mut self, kind: UpdateKind, guild: Option<GuildId>) {
        self(kind, guild)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct ObserverList {
    next_id: u64,
    entries: Vec<(SubscriptionId, Box<dyn GuildObserver>)>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: impl GuildObserver + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, Box::new(observer)));
        id
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(sid, _)| *sid != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn notify(&mut self, kind: UpdateKind, guild: Option<GuildId>) {
        if kind.is_empty() {
            return;
        }
        for (_, observer) in &mut self.entries {
            observer.on_update(kind, guild);
        }
    }
}
