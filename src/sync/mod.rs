pub mod controller;
pub mod driver;
pub mod presence;
pub mod reconciler;
pub mod router;

pub use controller::{ChatView, HistoryOutcome, HistoryTicket, Notice, NoticeKind, PendingSend, SyncController};
pub use driver::{Intent, SyncDriver, SyncHandle, SyncOutput};
pub use presence::{PresenceDebouncer, PresenceSignal};
pub use reconciler::MessageReconciler;
pub use router::{ActiveConversation, ConversationRouter, NotificationQueue, Route};
