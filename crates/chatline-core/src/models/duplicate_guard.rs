use super::message::Message;

/// Append-time policy that drops immediate re-submissions.
///
/// Only the single most recent message is inspected. The same question asked
/// twice with an answer in between is legitimate; the same message appended
/// twice back-to-back is a race.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateGuard;

impl DuplicateGuard {
    pub fn should_append(candidate: &Message, tail: &[Message]) -> bool {
        if candidate.is_typing_placeholder() {
            return true;
        }

        match tail.last() {
            Some(last) => {
                last.is_typing_placeholder()
                    || last.role != candidate.role
                    || last.content != candidate.content
            }
            None => true,
        }
    }
}
