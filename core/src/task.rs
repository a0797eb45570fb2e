//! The to-do task: the domain value synchronised with the blob store.
//!
//! # Design
//! A task carries its own work log. `progress` is a list of timestamps where
//! even entries start a block of work and odd entries end it, so a task is in
//! progress exactly when the list has odd length. The list is private and
//! only grows through [`Task::set_in_progress`].
//!
//! Completion and progress exclude each other: completing a task closes its
//! open block, and starting a block reopens a completed task.
//!
//! On the wire, fields holding their default value are omitted and missing
//! fields decode to their defaults, so `{"title":"t1"}` is a complete task.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task priority, `A` highest through `Z` lowest.
#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
}

impl Priority {
    pub const URGENT: Priority = Priority::A;
    pub const HIGH: Priority = Priority::B;
    pub const MEDIUM: Priority = Priority::C;
    pub const LOW: Priority = Priority::D;

    #[rustfmt::skip]
    const ALL: [Priority; 26] = [
        Priority::A, Priority::B, Priority::C, Priority::D, Priority::E, Priority::F,
        Priority::G, Priority::H, Priority::I, Priority::J, Priority::K, Priority::L,
        Priority::M, Priority::N, Priority::O, Priority::P, Priority::Q, Priority::R,
        Priority::S, Priority::T, Priority::U, Priority::V, Priority::W, Priority::X,
        Priority::Y, Priority::Z,
    ];

    /// Parse a single uppercase letter. Anything else is "no priority".
    pub fn parse(s: &str) -> Option<Priority> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => None,
        }
    }

    pub fn from_char(c: char) -> Option<Priority> {
        if c.is_ascii_uppercase() {
            Some(Self::ALL[(c as u8 - b'A') as usize])
        } else {
            None
        }
    }

    pub fn letter(&self) -> char {
        (b'A' + *self as u8) as char
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "is_false")]
    completed: bool,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub reminders: BTreeSet<DateTime<Utc>>,
    /// Planned work blocks, start mapped to end. Overlap is not checked.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub intentions: BTreeMap<DateTime<Utc>, DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    progress: Vec<DateTime<Utc>>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Task {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Option<Priority>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_due(mut self, due: Option<DateTime<Utc>>) -> Self {
        self.due = due;
        self
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Marking a task completed closes any open block of work.
    pub fn set_completed(&mut self, completed: bool) {
        if completed && self.in_progress() {
            self.set_in_progress(false);
        }
        self.completed = completed;
    }

    pub fn in_progress(&self) -> bool {
        self.progress.len() % 2 == 1
    }

    /// Start or stop a block of work, stamped with the current time.
    pub fn set_in_progress(&mut self, in_progress: bool) {
        self.set_in_progress_at(in_progress, Utc::now());
    }

    pub fn set_in_progress_at(&mut self, in_progress: bool, at: DateTime<Utc>) {
        if in_progress && self.completed {
            self.completed = false;
        }
        if in_progress != self.in_progress() {
            self.progress.push(at);
        }
    }

    pub fn progress(&self) -> &[DateTime<Utc>] {
        &self.progress
    }

    /// Drop the oldest `count` finished blocks, or all of them for `None`.
    /// An open block is never removed.
    pub fn clear_progress(&mut self, count: Option<usize>) {
        let complete_blocks = self.progress.len() / 2;
        let blocks = count.map_or(complete_blocks, |n| n.min(complete_blocks));
        self.progress.drain(..2 * blocks);
    }

    /// `#word` tokens of the title, without the `#`.
    pub fn labels(&self) -> BTreeSet<String> {
        self.title
            .split_whitespace()
            .filter_map(|token| token.strip_prefix('#'))
            .filter(|label| !label.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Render as a todo.txt line. Only title, description, priority, due
    /// date and completion survive; dates are UTC calendar dates.
    pub fn to_todo_txt(&self) -> String {
        self.to_todo_txt_at(Utc::now())
    }

    pub fn to_todo_txt_at(&self, now: DateTime<Utc>) -> String {
        let mut line = String::new();

        if self.completed {
            let done = self.progress.last().copied().unwrap_or(now);
            line.push_str(&format!("x {} ", done.date_naive()));
        } else if let Some(priority) = self.priority {
            line.push_str(&format!("({priority}) "));
        }

        // Each whitespace character becomes one space.
        let title = self
            .title
            .split(char::is_whitespace)
            .map(|token| match token.strip_prefix('#') {
                Some(label) if !label.is_empty() => format!("@{label}"),
                _ => token.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        line.push_str(&title);
        line.push(' ');

        if !self.description.is_empty() {
            let encoded: String =
                url::form_urlencoded::byte_serialize(self.description.as_bytes()).collect();
            line.push_str(&format!("desc:{encoded} "));
        }
        if self.completed {
            if let Some(priority) = self.priority {
                line.push_str(&format!("pri:{priority} "));
            }
        }
        if let Some(due) = self.due {
            line.push_str(&format!("due:{} ", due.date_naive()));
        }
        line.push('\n');
        line
    }

    pub fn by_title(a: &Task, b: &Task) -> Ordering {
        a.title.cmp(&b.title)
    }

    pub fn by_description(a: &Task, b: &Task) -> Ordering {
        a.description.cmp(&b.description)
    }

    /// Highest priority first, tasks without priority last.
    pub fn by_priority(a: &Task, b: &Task) -> Ordering {
        nones_last(a.priority, b.priority)
    }

    /// Earliest due first, tasks without due date last.
    pub fn by_due(a: &Task, b: &Task) -> Ordering {
        nones_last(a.due, b.due)
    }

    /// Open tasks before completed ones.
    pub fn by_completed(a: &Task, b: &Task) -> Ordering {
        a.completed.cmp(&b.completed)
    }

    /// Tasks in progress first.
    pub fn by_in_progress(a: &Task, b: &Task) -> Ordering {
        b.in_progress().cmp(&a.in_progress())
    }
}

fn nones_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
