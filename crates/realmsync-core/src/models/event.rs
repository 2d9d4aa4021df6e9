use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A member's RSVP to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RsvpChoice {
    Going,
    NotGoing,
    NoResponse,
}

impl std::fmt::Display for RsvpChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RsvpChoice::Going => write!(f, "Going"),
            RsvpChoice::NotGoing => write!(f, "Not Going"),
            RsvpChoice::NoResponse => write!(f, "No Response"),
        }
    }
}

/// An event as served by the platform API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    #[serde(default)]
    pub id: u64,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "communityId")]
    pub community_id: u64,
    #[serde(rename = "startsAt")]
    pub starts_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    /// Maximum attendees; `None` means uncapped.
    pub capacity: Option<u32>,
    #[serde(rename = "goingCount", default)]
    pub going_count: u32,
    #[serde(rename = "notGoingCount", default)]
    pub not_going_count: u32,
    /// The viewer's own RSVP, when authenticated.
    #[serde(rename = "viewerRsvp", default)]
    pub viewer_rsvp: Option<RsvpChoice>,
}

impl EventSummary {
    pub fn is_full(&self) -> bool {
        match self.capacity {
            Some(capacity) => self.going_count >= capacity,
            None => false,
        }
    }

    pub fn spots_remaining(&self) -> Option<u32> {
        self.capacity
            .map(|capacity| capacity.saturating_sub(self.going_count))
    }

    pub fn viewer_choice(&self) -> RsvpChoice {
        self.viewer_rsvp.unwrap_or(RsvpChoice::NoResponse)
    }

    /// "Feb 06, 2026 @ 07:00 PM", or "TBD" for undated events.
    pub fn formatted_start(&self) -> String {
        match self.starts_at {
            Some(dt) => dt.format("%b %d, %Y @ %I:%M %p").to_string(),
            None => "TBD".to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn event(capacity: Option<u32>, going: u32) -> EventSummary {
        EventSummary {
            id: 1,
            title: "Realm meetup".to_string(),
            description: None,
            community_id: 7,
            starts_at: None,
            location: None,
            capacity,
            going_count: going,
            not_going_count: 0,
            viewer_rsvp: None,
        }
    }

    #[test]
    fn test_capacity_accounting() {
        assert!(!event(None, 500).is_full());
        assert_eq!(event(None, 500).spots_remaining(), None);

        let capped = event(Some(20), 18);
        assert!(!capped.is_full());
        assert_eq!(capped.spots_remaining(), Some(2));

        let full = event(Some(20), 20);
        assert!(full.is_full());
        assert_eq!(full.spots_remaining(), Some(0));

        // Overbooked events never report negative spots.
        assert_eq!(event(Some(20), 25).spots_remaining(), Some(0));
    }

    #[test]
    fn test_viewer_choice_defaults_to_no_response() {
        assert_eq!(event(None, 0).viewer_choice(), RsvpChoice::NoResponse);
    }

    #[test]
    fn test_undated_event_formats_as_tbd() {
        assert_eq!(event(None, 0).formatted_start(), "TBD");
    }

    #[test]
    fn test_wire_field_names() {
        let json = r#"{
            "id": 4,
            "title": "Poll night",
            "description": null,
            "communityId": 7,
            "startsAt": "2026-02-06T19:00:00Z",
            "location": "Main hall",
            "capacity": 40,
            "goingCount": 12,
            "viewerRsvp": "going"
        }"#;
        let e: EventSummary = serde_json::from_str(json).expect("parse");
        assert_eq!(e.community_id, 7);
        assert_eq!(e.viewer_rsvp, Some(RsvpChoice::Going));
        assert_eq!(e.formatted_start(), "Feb 06, 2026 @ 07:00 PM");
    }
}
