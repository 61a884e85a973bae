//! Identity-linking runtime: verification sessions, link workflow, and
//! nickname synchronization over an abstract chat platform.

pub mod commands;
pub mod config;
pub mod events;
pub mod link_workflow;
pub mod nickname_sync;
pub mod platform;
pub mod profile_resolver;
pub mod reply_waiter;
pub mod runtime;
pub mod verification_session;

#[cfg(test)]
mod test_support;

pub use commands::{parse_command, usage_text, CommandCooldowns, CommandError, LinkCommand};
pub use config::{LinkRuntimeConfig, DEFAULT_COMMAND_PREFIX, DEFAULT_VERIFIED_ROLE};
pub use events::{IncomingMessage, LinkEventHandler, MessageDisposition, ReadyInfo};
pub use link_workflow::{
    CheckLinkOutcome, CommandContext, LinkOutcome, LinkSideEffects, LinkWorkflow,
    SideEffectOutcome, UnlinkReport, UnlinkStoreStep,
};
pub use nickname_sync::{
    canonical_label, strip_annotation, DisplayNameChange, NicknameSyncOutcome,
    NicknameSynchronizer, NICKNAME_MAX_CHARS,
};
pub use platform::{ChatPlatform, MemberRef, PlatformError, PlatformSink};
pub use profile_resolver::{
    HttpProfileResolver, ProfileResolver, ProfileResolverConfig, ResolvedProfile,
};
pub use reply_waiter::{IncomingReply, ReplyWaiter, WaitError, WaitOutcome};
pub use runtime::LinkRuntime;
pub use verification_session::{
    await_verdict, ConfirmationToken, SessionCache, SessionError, SessionPhase, SessionSlot,
    VerificationOutcome, VerificationSession,
};
