use std::fmt;

/// Key-space event kinds, named the way key-value servers publish them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyEvent {
    Delete = 0,
    RenameFrom = 1,
    RenameTo = 2,
    /// A TTL or absolute deadline was attached to the key
    ExpirationSet = 3,
    /// The key reached its deadline and was removed
    Expire = 4,
    SortStore = 5,
    Set = 6,
    RangeSet = 7,
    Increment = 8,
    IncrementByFloat = 9,
    Append = 10,
    PushLeft = 11,
    PopLeft = 12,
    PushRight = 13,
    PopRight = 14,
    ListInsert = 15,
    ListSet = 16,
    ListRemove = 17,
    ListTrim = 18,
    HashSet = 19,
    HashIncrement = 20,
    HashIncrementByFloat = 21,
    HashDelete = 22,
    SetAdd = 23,
    SetRemove = 24,
    SetPop = 25,
    SetIntersectStore = 26,
    SetUnionStore = 27,
    SetDiffStore = 28,
    SortedIncrementScore = 29,
    SortedAddScore = 30,
    SortedRemoveScore = 31,
    SortedRemoveByScore = 32,
    SortedRemoveByRank = 33,
    SortedIntersectStore = 34,
    SortedUnionStore = 35,
    Evicted = 36,
}

const NAMES: [(KeyEvent, &str); 37] = [
    (KeyEvent::Delete, "del"),
    (KeyEvent::RenameFrom, "rename_from"),
    (KeyEvent::RenameTo, "rename_to"),
    (KeyEvent::ExpirationSet, "expire"),
    (KeyEvent::Expire, "expired"),
    (KeyEvent::SortStore, "sortstore"),
    (KeyEvent::Set, "set"),
    (KeyEvent::RangeSet, "setrange"),
    (KeyEvent::Increment, "incrby"),
    (KeyEvent::IncrementByFloat, "incrbyfloat"),
    (KeyEvent::Append, "append"),
    (KeyEvent::PushLeft, "lpush"),
    (KeyEvent::PopLeft, "lpop"),
    (KeyEvent::PushRight, "rpush"),
    (KeyEvent::PopRight, "rpop"),
    (KeyEvent::ListInsert, "linsert"),
    (KeyEvent::ListSet, "lset"),
    (KeyEvent::ListRemove, "lrem"),
    (KeyEvent::ListTrim, "ltrim"),
    (KeyEvent::HashSet, "hset"),
    (KeyEvent::HashIncrement, "hincrby"),
    (KeyEvent::HashIncrementByFloat, "hincrbyfloat"),
    (KeyEvent::HashDelete, "hdel"),
    (KeyEvent::SetAdd, "sadd"),
    (KeyEvent::SetRemove, "srem"),
    (KeyEvent::SetPop, "spop"),
    (KeyEvent::SetIntersectStore, "sinterstore"),
    (KeyEvent::SetUnionStore, "sunionstore"),
    (KeyEvent::SetDiffStore, "sdiffstore"),
    (KeyEvent::SortedIncrementScore, "zincr"),
    (KeyEvent::SortedAddScore, "zadd"),
    (KeyEvent::SortedRemoveScore, "zrem"),
    (KeyEvent::SortedRemoveByScore, "zrembyscore"),
    (KeyEvent::SortedRemoveByRank, "zrembyrank"),
    (KeyEvent::SortedIntersectStore, "zinterstore"),
    (KeyEvent::SortedUnionStore, "zunionstore"),
    (KeyEvent::Evicted, "evicted"),
];

impl KeyEvent {
    /// Wire name of the event, e.g. `"del"`.
    pub fn as_str(self) -> &'static str {
        NAMES[self as usize].1
    }

    /// Parses a wire name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(event, _)| *event)
    }

    /// True for events after which the key no longer exists.
    pub fn removes_key(self) -> bool {
        matches!(
            self,
            KeyEvent::Delete | KeyEvent::Expire | KeyEvent::Evicted | KeyEvent::RenameFrom
        )
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One key-space event published by a [`KeyValueStore`](super::KeyValueStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEventNotification {
    pub key: String,
    pub event: KeyEvent,
}

impl KeyEventNotification {
    pub fn new(
        key: impl Into<String>,
        event: KeyEvent,
    ) -> Self {
        Self {
            key: key.into(),
            event,
        }
    }
}
