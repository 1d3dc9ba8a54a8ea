//! Event handlers behind the bot binaries.

pub mod approval;
pub mod card_interaction;
pub mod echo;

#[cfg(test)]
pub(crate) mod mock;

pub use approval::ApprovalBot;
pub use card_interaction::CardInteractionBot;
pub use echo::EchoBot;
