use std::fmt;
use std::sync::Arc;

use crate::collection::PageSortMode;
use crate::event::SenderId;
use crate::page::Page;
use crate::position::{PageDirection, PagePosition};

#[derive(Debug, Clone)]
pub enum CommandKind {
    /// Relative move by whole pages. Consecutive moves coalesce.
    MovePage { delta: isize },
    SetPosition {
        position: PagePosition,
        direction: PageDirection,
    },
    MoveToMarker {
        direction: PageDirection,
        is_loop: bool,
        include_terminal: bool,
    },
    Refresh,
    Sort { mode: PageSortMode },
    Remove { pages: Vec<Arc<Page>> },
    Dispose,
}

impl CommandKind {
    pub fn priority(&self) -> u8 {
        match self {
            CommandKind::MovePage { .. }
            | CommandKind::SetPosition { .. }
            | CommandKind::MoveToMarker { .. } => 0,
            CommandKind::Refresh => 1,
            CommandKind::Sort { .. } => 2,
            CommandKind::Remove { .. } => 3,
            CommandKind::Dispose => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::MovePage { .. } => "move-page",
            CommandKind::SetPosition { .. } => "set-position",
            CommandKind::MoveToMarker { .. } => "move-to-marker",
            CommandKind::Refresh => "refresh",
            CommandKind::Sort { .. } => "sort",
            CommandKind::Remove { .. } => "remove",
            CommandKind::Dispose => "dispose",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookCommand {
    pub sender: SenderId,
    pub kind: CommandKind,
}

impl BookCommand {
    pub fn new(sender: SenderId, kind: CommandKind) -> Self {
        Self { sender, kind }
    }

    pub fn priority(&self) -> u8 {
        self.kind.priority()
    }

    /// Folds `other` into this command when both are relative moves.
    /// Returns false and leaves `self` untouched otherwise.
    pub fn try_merge(&mut self, other: &BookCommand) -> bool {
        match (&mut self.kind, &other.kind) {
            (CommandKind::MovePage { delta }, CommandKind::MovePage { delta: incoming }) => {
                *delta += *incoming;
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for BookCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CommandKind::MovePage { delta } => write!(f, "move-page({delta:+})"),
            CommandKind::SetPosition {
                position,
                direction,
            } => write!(f, "set-position({position} {direction})"),
            CommandKind::Sort { mode } => write!(f, "sort({mode})"),
            CommandKind::Remove { pages } => write!(f, "remove({})", pages.len()),
            kind => f.write_str(kind.name()),
        }
    }
}

/// How a queued command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed,
    /// Folded into the pending move command.
    Merged,
    /// Evicted by a higher priority command.
    Superseded,
    Canceled,
    Faulted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(kind: CommandKind) -> BookCommand {
        BookCommand::new(SenderId::USER, kind)
    }

    #[test]
    fn priorities_follow_command_weight() {
        let ordered = [
            command(CommandKind::MovePage { delta: 1 }),
            command(CommandKind::Refresh),
            command(CommandKind::Sort {
                mode: PageSortMode::FileName,
            }),
            command(CommandKind::Remove { pages: Vec::new() }),
            command(CommandKind::Dispose),
        ];
        let priorities: Vec<u8> = ordered.iter().map(BookCommand::priority).collect();
        assert_eq!(priorities, [0, 1, 2, 3, 4]);
        let jump = command(CommandKind::SetPosition {
            position: PagePosition::ZERO,
            direction: PageDirection::Forward,
        });
        assert_eq!(jump.priority(), 0);
    }

    #[test]
    fn only_relative_moves_merge() {
        let mut pending = command(CommandKind::MovePage { delta: 2 });
        assert!(pending.try_merge(&command(CommandKind::MovePage { delta: -1 })));
        assert!(matches!(pending.kind, CommandKind::MovePage { delta: 1 }));

        assert!(!pending.try_merge(&command(CommandKind::Refresh)));
        let mut refresh = command(CommandKind::Refresh);
        assert!(!refresh.try_merge(&command(CommandKind::MovePage { delta: 1 })));
    }

    #[test]
    fn display_names_the_command() {
        assert_eq!(command(CommandKind::MovePage { delta: -2 }).to_string(), "move-page(-2)");
        assert_eq!(command(CommandKind::Dispose).to_string(), "dispose");
    }
}
