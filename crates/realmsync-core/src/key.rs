//! Structured query keys.
//!
//! Every cached result is identified by a [`QueryKey`] - a closed sum type
//! over the resource kinds the platform client synchronizes, with typed
//! parameters. Equality and hashing come from the derived impls, so two
//! keys are the same entry iff they are the same variant with the same
//! parameters; [`QueryKey::canonical`] produces the stable JSON form used
//! in dehydrated snapshots and log lines.

use serde::{Deserialize, Serialize};

/// Cursor for paginated queries.
///
/// Which variant a call site uses depends on what its endpoint pages by:
/// an opaque server cursor, an item offset, or a timestamp upper bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageParam {
    /// Opaque server-issued cursor.
    Cursor(String),
    /// Zero-based item offset.
    Offset(u64),
    /// Items strictly older than this unix timestamp (milliseconds).
    Before(i64),
}

/// The resource kind a key addresses, used for bulk invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Profile,
    Event,
    Community,
    Post,
    Poll,
    Ticket,
}

/// Canonical identifier for a cached query result.
///
/// Keys are immutable values; a paginated query derives one key per page
/// via [`QueryKey::paged`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKey {
    /// A single profile, addressed by realm address.
    Profile { address: String },
    /// A single event.
    Event { event_id: u64 },
    /// The attendee list of an event.
    EventAttendees { event_id: u64 },
    /// A single community.
    Community { community_id: u64 },
    /// The member list of a community.
    CommunityMembers { community_id: u64 },
    /// A single feed post.
    Post { post_id: u64 },
    /// A community's feed (paginated at call sites).
    CommunityFeed { community_id: u64 },
    /// A single poll.
    Poll { poll_id: u64 },
    /// Tickets held by an address for an event.
    Tickets { event_id: u64, holder: String },
    /// One page of a paginated query. `param` is `None` for the first page.
    Page {
        base: Box<QueryKey>,
        param: Option<PageParam>,
    },
}

impl QueryKey {
    /// The resource kind this key addresses. Pages report their base kind.
    pub fn kind(&self) -> ResourceKind {
        match self {
            QueryKey::Profile { .. } => ResourceKind::Profile,
            QueryKey::Event { .. } | QueryKey::EventAttendees { .. } => ResourceKind::Event,
            QueryKey::Community { .. } | QueryKey::CommunityMembers { .. } => {
                ResourceKind::Community
            }
            QueryKey::Post { .. } | QueryKey::CommunityFeed { .. } => ResourceKind::Post,
            QueryKey::Poll { .. } => ResourceKind::Poll,
            QueryKey::Tickets { .. } => ResourceKind::Ticket,
            QueryKey::Page { base, .. } => base.kind(),
        }
    }

    /// Derive the key for one page of this query.
    pub fn paged(&self, param: Option<PageParam>) -> QueryKey {
        QueryKey::Page {
            base: Box::new(self.clone()),
            param,
        }
    }

    /// True if this key is a page of `base` (or `base` itself).
    pub fn is_page_of(&self, base: &QueryKey) -> bool {
        match self {
            QueryKey::Page { base: b, .. } => b.as_ref() == base,
            other => other == base,
        }
    }

    /// Stable serialized form, used for snapshot payloads and logging.
    ///
    /// Serialization of this enum is infallible in practice; the debug
    /// fallback only exists so this method never panics.
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

// ============================================================================
// Tests
// ============================================================================
