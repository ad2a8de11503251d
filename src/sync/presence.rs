//! Local typing presence.
//!
//! Raw keystrokes are coalesced into one start-typing signal per composing
//! session and one stop-typing signal after `window` of silence. The
//! debouncer holds a single deadline that every keystroke pushes back, so
//! at most one stop can ever fire per idle period.

use std::time::Duration;
use tokio::time::Instant;

use crate::api::models::ConversationId;

pub const DEFAULT_TYPING_WINDOW: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceSignal {
    StartTyping(ConversationId),
    StopTyping(ConversationId),
}

#[derive(Debug, Clone, PartialEq)]
enum TypingState {
    Idle,
    Composing {
        conversation: ConversationId,
        last_keystroke_at: Instant,
    },
}

#[derive(Debug)]
pub struct PresenceDebouncer {
    window: Duration,
    state: TypingState,
}

impl Default for PresenceDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_WINDOW)
    }
}

impl PresenceDebouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, state: TypingState::Idle }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_composing(&self) -> bool {
        matches!(self.state, TypingState::Composing { .. })
    }

    /// Records a keystroke in `conversation`.
    ///
    /// Returns the signals to emit, in order. A keystroke for a different
    /// conversation than the one being composed in first closes the old
    /// session.
    pub fn on_keystroke(&mut self, conversation: &ConversationId, now: Instant) -> Vec<PresenceSignal> {
        if let TypingState::Composing { conversation: current, last_keystroke_at } = &mut self.state {
            if current == conversation {
                if now > *last_keystroke_at {
                    *last_keystroke_at = now;
                }
                return Vec::new();
            }
        }
        let mut out: Vec<PresenceSignal> = self.force_idle().into_iter().collect();
        self.state = TypingState::Composing {
            conversation: conversation.clone(),
            last_keystroke_at: now,
        };
        out.push(PresenceSignal::StartTyping(conversation.clone()));
        out
    }

    /// When the pending stop check is due, if composing.
    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            TypingState::Composing { last_keystroke_at, .. } => Some(*last_keystroke_at + self.window),
            TypingState::Idle => None,
        }
    }

    /// Runs the stop check. Only the check for the latest keystroke can pass.
    pub fn on_timer(&mut self, now: Instant) -> Option<PresenceSignal> {
        let due = match &self.state {
            TypingState::Composing { last_keystroke_at, .. } => {
                now.saturating_duration_since(*last_keystroke_at) >= self.window
            }
            TypingState::Idle => false,
        };
        if due { self.force_idle() } else { None }
    }

    /// Ends the composing session immediately, naming the conversation it
    /// belonged to.
    pub fn force_idle(&mut self) -> Option<PresenceSignal> {
        match std::mem::replace(&mut self.state, TypingState::Idle) {
            TypingState::Composing { conversation, .. } => Some(PresenceSignal::StopTyping(conversation)),
            TypingState::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Feeds keystrokes at the given offsets and fires every timer the way a
    /// scheduler would, returning signals tagged with their offset in ms.
    fn simulate(keystrokes: &[u64], until: u64) -> Vec<(u64, PresenceSignal)> {
        let t0 = Instant::now();
        let conv = ConversationId::new("c1");
        let mut deb = PresenceDebouncer::default();
        let mut out = Vec::new();
        let mut keys = keystrokes.iter().copied().peekable();
        let mut now = 0;
        while now <= until {
            while keys.peek() == Some(&now) {
                keys.next();
                for s in deb.on_keystroke(&conv, t0 + ms(now)) {
                    out.push((now, s));
                }
            }
            if let Some(deadline) = deb.deadline() {
                if deadline <= t0 + ms(now) {
                    if let Some(s) = deb.on_timer(t0 + ms(now)) {
                        out.push((now, s));
                    }
                }
            }
            now += 50;
        }
        out
    }

    #[test]
    fn burst_yields_one_start_and_one_stop() {
        let keys: Vec<u64> = (0..40).map(|i| i * 100).collect();
        let out = simulate(&keys, 10_000);
        let conv = ConversationId::new("c1");
        assert_eq!(
            out,
            vec![
                (0, PresenceSignal::StartTyping(conv.clone())),
                (3900 + 3000, PresenceSignal::StopTyping(conv)),
            ]
        );
    }

    #[test]
    fn compose_pause_compose_then_stop() {
        // 1000ms typing, 500ms pause, 1000ms typing, then silence.
        let mut keys: Vec<u64> = (0..=10).map(|i| i * 100).collect();
        keys.extend((0..=10).map(|i| 1500 + i * 100));
        let out = simulate(&keys, 2500 + 3500);
        let starts = out.iter().filter(|(_, s)| matches!(s, PresenceSignal::StartTyping(_))).count();
        let stops: Vec<u64> = out
            .iter()
            .filter(|(_, s)| matches!(s, PresenceSignal::StopTyping(_)))
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(starts, 1);
        assert_eq!(stops, vec![2500 + 3000]);
        assert_eq!(out[0].0, 0);
    }

    #[test]
    fn early_timer_does_not_stop() {
        let t0 = Instant::now();
        let conv = ConversationId::new("c1");
        let mut deb = PresenceDebouncer::new(ms(3000));
        deb.on_keystroke(&conv, t0);
        deb.on_keystroke(&conv, t0 + ms(2000));
        // The check scheduled by the first keystroke.
        assert_eq!(deb.on_timer(t0 + ms(3000)), None);
        assert!(deb.is_composing());
        assert_eq!(deb.on_timer(t0 + ms(5000)), Some(PresenceSignal::StopTyping(conv)));
        assert_eq!(deb.on_timer(t0 + ms(9000)), None);
    }

    #[test]
    fn force_idle_names_previous_conversation() {
        let t0 = Instant::now();
        let a = ConversationId::new("a");
        let mut deb = PresenceDebouncer::default();
        deb.on_keystroke(&a, t0);
        assert_eq!(deb.force_idle(), Some(PresenceSignal::StopTyping(a)));
        assert_eq!(deb.force_idle(), None);
        assert_eq!(deb.deadline(), None);
    }

    #[test]
    fn keystroke_in_other_conversation_closes_old_session() {
        let t0 = Instant::now();
        let (a, b) = (ConversationId::new("a"), ConversationId::new("b"));
        let mut deb = PresenceDebouncer::default();
        deb.on_keystroke(&a, t0);
        let out = deb.on_keystroke(&b, t0 + ms(10));
        assert_eq!(out, vec![PresenceSignal::StopTyping(a), PresenceSignal::StartTyping(b)]);
    }
}
