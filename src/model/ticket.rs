use serde::{Deserialize, Serialize};

/// Level of a ticket in the three-tier hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Requirement document (PRD locally, Epic/Feature remotely).
    Top,
    /// User story (Story/Platform Feature remotely).
    Mid,
    /// Task (Sub-task/User Story remotely).
    Leaf,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Top, Tier::Mid, Tier::Leaf];

    pub fn index(self) -> usize {
        match self {
            Tier::Top => 0,
            Tier::Mid => 1,
            Tier::Leaf => 2,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Tier::Top => "PRD",
            Tier::Mid => "US",
            Tier::Leaf => "TASK",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tier::Top => "PRD",
            Tier::Mid => "User Story",
            Tier::Leaf => "Task",
        }
    }

    pub fn child(self) -> Option<Tier> {
        match self {
            Tier::Top => Some(Tier::Mid),
            Tier::Mid => Some(Tier::Leaf),
            Tier::Leaf => None,
        }
    }

    /// PRD numbers are zero-padded to two digits, stories and tasks are not.
    fn pad_width(self) -> usize {
        match self {
            Tier::Top => 2,
            Tier::Mid | Tier::Leaf => 0,
        }
    }

    /// Render a sequential number as a local id, e.g. `PRD01`, `US7`.
    pub fn format_id(self, number: u32) -> String {
        format!("{}{:0width$}", self.prefix(), number, width = self.pad_width())
    }

    /// Extract the number from a local id or file name carrying this tier's
    /// prefix. Only the leading digits after the prefix are read, so
    /// `PRD03-base.json` yields 3.
    pub fn parse_number(self, id: &str) -> Option<u32> {
        let rest = id.strip_prefix(self.prefix())?;
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }
        digits.parse().ok()
    }
}

/// The universal unit of both hierarchies.
///
/// A ticket fetched from the remote side always carries `remote_id`; one read
/// from local documents carries `local_id` and carries `remote_id` only once it
/// has been pushed or pulled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub remote_kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_parent_id: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub children: Vec<Ticket>,
    #[serde(default)]
    pub is_update: bool,
}

impl Ticket {
    pub fn new(tier: Tier, title: impl Into<String>) -> Self {
        Self {
            tier,
            remote_id: None,
            remote_kind: String::new(),
            remote_parent_id: None,
            local_id: None,
            local_parent_id: None,
            title: title.into(),
            description: None,
            children: Vec::new(),
            is_update: false,
        }
    }

    /// Shorthand for a remote-sourced ticket.
    pub fn remote(tier: Tier, remote_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            remote_id: Some(remote_id.into()),
            ..Self::new(tier, title)
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.remote_kind = kind.into();
        self
    }

    pub fn with_parent(mut self, remote_parent_id: impl Into<String>) -> Self {
        self.remote_parent_id = Some(remote_parent_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_children(mut self, children: Vec<Ticket>) -> Self {
        self.children = children;
        self
    }

    /// The remote id, treating an empty string as absent.
    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn description_text(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }

    /// Pre-order iteration over this ticket and all descendants.
    pub fn walk(&self) -> Vec<&Ticket> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}
