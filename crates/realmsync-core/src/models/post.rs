use serde::{Deserialize, Serialize};

/// A social-feed post. Feeds page backward by `created_at`, which is why
/// the timestamp is a unix millisecond value rather than a formatted
/// date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub id: u64,
    /// Author realm address.
    pub author: String,
    pub body: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "likeCount", default)]
    pub like_count: u32,
    /// Present when the post carries an inline poll.
    #[serde(default)]
    pub poll: Option<Poll>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    #[serde(default)]
    pub id: u64,
    pub question: String,
    #[serde(default)]
    pub options: Vec<PollOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub label: String,
    #[serde(rename = "voteCount", default)]
    pub vote_count: u32,
}

impl Poll {
    pub fn total_votes(&self) -> u32 {
        self.options.iter().map(|o| o.vote_count).sum()
    }

    /// Share of the vote for one option, 0-100. Zero-vote polls report 0
    /// for every option.
    pub fn percent_for(&self, index: usize) -> u32 {
        let total = self.total_votes();
        if total == 0 {
            return 0;
        }
        self.options
            .get(index)
            .map(|o| o.vote_count * 100 / total)
            .unwrap_or(0)
    }
}

// ============================================================================
// Tests
// ============================================================================
