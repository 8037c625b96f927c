pub mod conversation_controller;

#[cfg(test)]
mod conversation_controller_test;

pub use conversation_controller::{
    ControllerError, ControllerResult, ControllerState, ConversationController, SubmitOutcome,
};
