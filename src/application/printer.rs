#[cfg(test)]
#[path = "printer_test.rs"]
mod tests;

use std::io::Write;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use yansi::Paint;

use crate::domain::models::Conversation;
use crate::domain::models::Event;
use crate::domain::models::Message;
use crate::domain::models::Role;

/// Renders store events to the terminal as they arrive. Assistant chunks are
/// written without a newline so the reply grows in place.
pub fn start(mut rx: mpsc::UnboundedReceiver<Event>) -> JoinHandle<()> {
    return tokio::spawn(async move {
        let mut mid_reply = false;
        while let Some(event) = rx.recv().await {
            match event {
                Event::AssistantChunk(text) => {
                    if !mid_reply {
                        print!("{}", Paint::green("Assistant: ").bold());
                        mid_reply = true;
                    }
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                Event::AssistantCompleted(message) => {
                    if !mid_reply {
                        print!("{}", format_message(&message));
                    }
                    println!();
                    mid_reply = false;
                }
                Event::Notification(text) => {
                    if mid_reply {
                        println!();
                        mid_reply = false;
                    }
                    eprintln!("{}", Paint::red(text));
                }
            }
        }
    });
}

pub fn format_conversation(conversation: &Conversation) -> String {
    return format!(
        "- (ID: {}) {}, {}",
        conversation.id,
        conversation.created_at.format("%Y-%m-%d %H:%M"),
        conversation.title
    );
}

pub fn format_message(message: &Message) -> String {
    let author = match message.role {
        Role::User => Paint::cyan("You").bold().to_string(),
        Role::Assistant => Paint::green("Assistant").bold().to_string(),
    };

    return format!("{author}: {}", message.content);
}
