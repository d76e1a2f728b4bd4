//! Poll session state for a single classroom.
//!
//! [`PollSession`] owns every piece of poll state: the current poll, the
//! connected students, the answers to the current poll, the archived history
//! and the countdown timer. It is a plain synchronous value; callers that
//! share it across tasks wrap it in `Arc<Mutex<_>>` so that operations run
//! one at a time.
//!
//! The poll lifecycle has no explicit state enum:
//! - no poll -> poll active
//! - poll active -> ended (timer at zero, or every student answered)
//! - ended -> archived (on completion, on the next poll, or on clear)

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ClassPollError, Result};

/// Time limit used when a poll does not specify one, and the timer value
/// while no poll is current.
pub const DEFAULT_TIME_LIMIT_SECS: u32 = 60;

// ============================================================================
// ConnectionId
// ============================================================================

/// Opaque identifier of one client connection.
///
/// Issued by the transport layer; the session only uses it as a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a fresh random connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Poll
// ============================================================================

/// Parameters for creating a poll.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPoll {
    /// The question text.
    pub question: String,
    /// Answer options, at least two.
    pub options: Vec<String>,
    /// Time limit in seconds; the session default applies when absent.
    #[serde(default)]
    pub time_limit: Option<u32>,
    /// Index of the correct option. Informational only.
    #[serde(default)]
    pub correct_option_index: Option<usize>,
}

impl NewPoll {
    /// Creates poll parameters with no explicit time limit or correct answer.
    #[must_use]
    pub fn new(question: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            question: question.into(),
            options,
            time_limit: None,
            correct_option_index: None,
        }
    }

    /// Sets the time limit in seconds.
    #[must_use]
    pub fn with_time_limit(mut self, seconds: u32) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    /// Marks an option as the correct one.
    #[must_use]
    pub fn with_correct_option(mut self, index: usize) -> Self {
        self.correct_option_index = Some(index);
        self
    }
}

/// A multiple-choice question broadcast to the class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    /// Unique poll identifier.
    pub id: Uuid,
    /// The question text.
    pub question: String,
    /// Answer options in display order.
    pub options: Vec<String>,
    /// Index of the correct option, if the teacher marked one.
    pub correct_option_index: Option<usize>,
    /// Time limit in seconds.
    pub time_limit: u32,
    /// When the poll was created.
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Students and answers
// ============================================================================

/// A connected student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    /// Connection the student joined from.
    pub connection_id: ConnectionId,
    /// Display name, unique among connected students.
    pub name: String,
    /// Whether the student answered the current poll.
    pub has_answered: bool,
    /// When the student joined.
    pub joined_at: DateTime<Utc>,
}

/// Public view of a student. Never exposes the connection id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    /// Display name.
    pub name: String,
    /// Whether the student answered the current poll.
    pub has_answered: bool,
}

impl From<&Student> for RosterEntry {
    fn from(student: &Student) -> Self {
        Self {
            name: student.name.clone(),
            has_answered: student.has_answered,
        }
    }
}

/// Outcome of removing a student by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedStudent {
    /// Connection of the removed student, `None` if no student had that name.
    pub connection_id: Option<ConnectionId>,
    /// Roster after the removal.
    pub roster: Vec<RosterEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Answer {
    student_name: String,
    option_index: usize,
}

// ============================================================================
// Results and history
// ============================================================================

/// One student's answer as shown in results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAnswer {
    /// Student name.
    pub name: String,
    /// Text of the chosen option.
    pub answer_text: String,
}

/// Aggregated results of the current poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    /// The poll these results belong to.
    pub poll_id: Uuid,
    /// The question text.
    pub question: String,
    /// Answer options in display order.
    pub options: Vec<String>,
    /// Vote count per option, aligned with `options`.
    pub votes: Vec<u32>,
    /// Every recorded answer, in submission order.
    pub student_answers: Vec<StudentAnswer>,
    /// Number of connected students.
    pub total_students: usize,
    /// Number of recorded answers.
    pub answered_count: usize,
    /// Seconds left on the poll timer.
    pub time_remaining: u32,
}

/// An archived poll with its final results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// The archived poll.
    #[serde(flatten)]
    pub poll: Poll,
    /// Results at the time of archiving.
    pub results: PollResults,
    /// When the poll was archived.
    pub completed_at: DateTime<Utc>,
}

/// Final snapshot produced when a poll ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPoll {
    /// Final results of the poll.
    pub results: PollResults,
    /// History including the completed poll.
    pub history: Vec<HistoryEntry>,
}

// ============================================================================
// PollSession
// ============================================================================

/// All poll, student and answer state for one classroom session.
#[derive(Debug, Clone)]
pub struct PollSession {
    current_poll: Option<Poll>,
    students: Vec<Student>,
    answers: Vec<Answer>,
    history: Vec<HistoryEntry>,
    time_remaining: u32,
    default_time_limit: u32,
}

impl Default for PollSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PollSession {
    /// Creates an empty session using the default time limit.
    ///
    /// # Examples
    ///
    /// ```
    /// use classpoll_session::PollSession;
    ///
    /// let session = PollSession::new();
    /// assert!(session.current_poll().is_none());
    /// assert!(session.can_ask_new_question());
    /// assert_eq!(session.time_remaining(), 60);
    /// ```
    #[must_use]
    pub const fn new() -> Self {
        Self::with_default_time_limit(DEFAULT_TIME_LIMIT_SECS)
    }

    /// Creates an empty session with a custom default time limit.
    #[must_use]
    pub const fn with_default_time_limit(default_time_limit: u32) -> Self {
        Self {
            current_poll: None,
            students: Vec::new(),
            answers: Vec::new(),
            history: Vec::new(),
            time_remaining: default_time_limit,
            default_time_limit,
        }
    }

    /// Returns `true` if the teacher may start a new poll.
    ///
    /// That is the case when no poll is current, the current poll already
    /// ended, the timer has run out, or every connected student has answered.
    #[must_use]
    pub fn can_ask_new_question(&self) -> bool {
        if self.current_poll.is_none() || self.time_remaining == 0 || self.is_archived() {
            return true;
        }
        self.students.iter().all(|s| s.has_answered)
    }

    /// Returns `true` if the current poll is over.
    ///
    /// An archived poll stays ended even if students join afterwards.
    /// Unlike [`can_ask_new_question`](Self::can_ask_new_question), a poll
    /// with nobody connected has not ended until its timer runs out.
    #[must_use]
    pub fn has_ended(&self) -> bool {
        if self.current_poll.is_none() {
            return false;
        }
        self.time_remaining == 0
            || self.is_archived()
            || (!self.students.is_empty() && self.students.iter().all(|s| s.has_answered))
    }

    /// Creates a new poll and makes it current.
    ///
    /// A current poll is archived first. Answers are cleared, every student
    /// is marked as not answered and the timer restarts at the poll's limit.
    ///
    /// # Errors
    ///
    /// - `PollInProgress` if the current poll is still collecting answers
    /// - `InvalidPoll` for an empty question, fewer than two options or a
    ///   zero time limit
    pub fn create_poll(&mut self, new_poll: NewPoll) -> Result<Poll> {
        if !self.can_ask_new_question() {
            return Err(ClassPollError::PollInProgress);
        }

        let time_limit = new_poll.time_limit.unwrap_or(self.default_time_limit);
        if new_poll.question.trim().is_empty() {
            return Err(ClassPollError::invalid_poll("question must not be empty"));
        }
        if new_poll.options.len() < 2 {
            return Err(ClassPollError::invalid_poll(format!(
                "a poll needs at least 2 options, got {}",
                new_poll.options.len()
            )));
        }
        if time_limit == 0 {
            return Err(ClassPollError::invalid_poll(
                "time limit must be greater than 0",
            ));
        }

        if self.current_poll.is_some() {
            self.save_poll_to_history();
        }

        let poll = Poll {
            id: Uuid::new_v4(),
            question: new_poll.question,
            options: new_poll.options,
            correct_option_index: new_poll.correct_option_index,
            time_limit,
            created_at: Utc::now(),
        };

        self.answers.clear();
        self.reset_answered_flags();
        self.time_remaining = time_limit;
        self.current_poll = Some(poll.clone());

        Ok(poll)
    }

    /// Registers a student on a connection and returns the updated roster.
    ///
    /// Registering an already registered connection replaces its entry.
    ///
    /// # Errors
    ///
    /// - `InvalidName` if the name is empty
    /// - `NameTaken` if a connected student already uses the exact name
    pub fn add_student(
        &mut self,
        connection_id: ConnectionId,
        name: impl Into<String>,
    ) -> Result<Vec<RosterEntry>> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ClassPollError::InvalidName);
        }
        if self.students.iter().any(|s| s.name == name) {
            return Err(ClassPollError::name_taken(name));
        }

        let student = Student {
            connection_id,
            name,
            has_answered: false,
            joined_at: Utc::now(),
        };

        match self
            .students
            .iter_mut()
            .find(|s| s.connection_id == connection_id)
        {
            Some(existing) => *existing = student,
            None => self.students.push(student),
        }

        Ok(self.roster())
    }

    /// Removes the student registered on a connection, if any.
    ///
    /// Their answer to the current poll is kept.
    pub fn remove_student(&mut self, connection_id: ConnectionId) -> Option<Student> {
        let position = self
            .students
            .iter()
            .position(|s| s.connection_id == connection_id)?;
        Some(self.students.remove(position))
    }

    /// Removes a student by name, together with their answer.
    pub fn remove_student_by_name(&mut self, name: &str) -> RemovedStudent {
        let connection_id = self
            .students
            .iter()
            .position(|s| s.name == name)
            .map(|position| self.students.remove(position).connection_id);

        if connection_id.is_some() {
            self.answers.retain(|a| a.student_name != name);
        }

        RemovedStudent {
            connection_id,
            roster: self.roster(),
        }
    }

    /// Records a student's answer to the current poll.
    ///
    /// The answer is keyed by `student_name`, so a reconnecting student with
    /// the same name replaces their earlier answer.
    ///
    /// # Errors
    ///
    /// - `NoActivePoll` if no poll is current
    /// - `PollEnded` if the current poll was already archived
    /// - `StudentNotFound` if the connection has no registered student
    /// - `AlreadyAnswered` if the student already answered this poll
    /// - `InvalidOption` if `option_index` is out of range
    pub fn submit_answer(
        &mut self,
        connection_id: ConnectionId,
        student_name: &str,
        option_index: usize,
    ) -> Result<PollResults> {
        let option_count = match &self.current_poll {
            Some(poll) => poll.options.len(),
            None => return Err(ClassPollError::NoActivePoll),
        };
        if self.is_archived() {
            return Err(ClassPollError::PollEnded);
        }

        let student = self
            .students
            .iter_mut()
            .find(|s| s.connection_id == connection_id)
            .ok_or(ClassPollError::StudentNotFound)?;

        if student.has_answered {
            return Err(ClassPollError::AlreadyAnswered);
        }
        if option_index >= option_count {
            return Err(ClassPollError::InvalidOption {
                index: option_index,
                option_count,
            });
        }

        student.has_answered = true;
        match self
            .answers
            .iter_mut()
            .find(|a| a.student_name == student_name)
        {
            Some(answer) => answer.option_index = option_index,
            None => self.answers.push(Answer {
                student_name: student_name.to_string(),
                option_index,
            }),
        }

        self.results().ok_or(ClassPollError::NoActivePoll)
    }

    /// Computes results for the current poll, or `None` if there is none.
    #[must_use]
    pub fn results(&self) -> Option<PollResults> {
        let poll = self.current_poll.as_ref()?;

        let mut votes = vec![0_u32; poll.options.len()];
        let mut student_answers = Vec::with_capacity(self.answers.len());
        for answer in &self.answers {
            if let Some(count) = votes.get_mut(answer.option_index) {
                *count += 1;
            }
            student_answers.push(StudentAnswer {
                name: answer.student_name.clone(),
                answer_text: poll
                    .options
                    .get(answer.option_index)
                    .cloned()
                    .unwrap_or_default(),
            });
        }

        Some(PollResults {
            poll_id: poll.id,
            question: poll.question.clone(),
            options: poll.options.clone(),
            votes,
            student_answers,
            total_students: self.students.len(),
            answered_count: self.answers.len(),
            time_remaining: self.time_remaining,
        })
    }

    /// Decrements the timer by one second, never below zero.
    pub fn decrement_timer(&mut self) -> u32 {
        self.time_remaining = self.time_remaining.saturating_sub(1);
        self.time_remaining
    }

    /// Restarts the timer at the current poll's limit, or the default.
    pub fn reset_timer(&mut self) {
        self.time_remaining = self
            .current_poll
            .as_ref()
            .map_or(self.default_time_limit, |p| p.time_limit);
    }

    /// Archives the current poll with its results.
    ///
    /// Does nothing if there is no current poll or it is already archived.
    pub fn save_poll_to_history(&mut self) {
        if self.is_archived() {
            return;
        }
        let (Some(poll), Some(results)) = (self.current_poll.clone(), self.results()) else {
            return;
        };

        tracing::debug!(
            poll_id = %poll.id,
            question = %poll.question,
            votes = ?results.votes,
            answered = results.answered_count,
            "Saving poll to history"
        );

        self.history.push(HistoryEntry {
            poll,
            results,
            completed_at: Utc::now(),
        });
    }

    /// Archives the current poll and returns its final snapshot.
    ///
    /// Returns `None` if there is no current poll.
    pub fn complete_poll(&mut self) -> Option<CompletedPoll> {
        self.save_poll_to_history();
        let results = self.results()?;
        Some(CompletedPoll {
            results,
            history: self.history.clone(),
        })
    }

    /// Archives and drops the current poll, returning to the idle state.
    pub fn clear_current_poll(&mut self) {
        self.save_poll_to_history();
        self.current_poll = None;
        self.answers.clear();
        self.reset_answered_flags();
        self.time_remaining = self.default_time_limit;
    }

    /// Returns `true` if the current poll is already in the history.
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.current_poll
            .as_ref()
            .is_some_and(|poll| self.history.iter().any(|h| h.poll.id == poll.id))
    }

    /// Returns the connected students in join order.
    #[must_use]
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.students.iter().map(RosterEntry::from).collect()
    }

    /// Returns the student registered on a connection.
    #[must_use]
    pub fn student(&self, connection_id: ConnectionId) -> Option<&Student> {
        self.students
            .iter()
            .find(|s| s.connection_id == connection_id)
    }

    /// Returns the current poll.
    #[must_use]
    pub const fn current_poll(&self) -> Option<&Poll> {
        self.current_poll.as_ref()
    }

    /// Returns archived polls, oldest first.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Returns the seconds left on the timer.
    #[must_use]
    pub const fn time_remaining(&self) -> u32 {
        self.time_remaining
    }

    fn reset_answered_flags(&mut self) {
        for student in &mut self.students {
            student.has_answered = false;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
