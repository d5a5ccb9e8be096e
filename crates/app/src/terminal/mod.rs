/// Line commands for the auth prompt and the chat surface.
pub mod command;
pub mod render;
