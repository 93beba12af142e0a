//! Cancellable events: an early handler vetoes, a late handler honours it.
//!
//! The dispatcher itself never looks at the cancellation flag; every handler
//! runs and decides for itself.

use firebus::prelude::*;
use firebus::CancelFlag;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Event, Debug, Default)]
struct ChatMessage {
    author: String,
    text: String,
    cancelled: CancelFlag,
}

impl Cancellable for ChatMessage {
    fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    fn set_cancelled(&self, cancel: bool) {
        self.cancelled.set_cancelled(cancel)
    }
}

struct Moderator {
    banned_words: Vec<&'static str>,
}

#[listener]
impl Moderator {
    #[subscribe(priority = First)]
    pub fn screen(&self, message: &ChatMessage) {
        if self
            .banned_words
            .iter()
            .any(|word| message.text.contains(word))
        {
            tracing::info!(author = %message.author, "message cancelled by moderator");
            message.set_cancelled(true);
        }
    }
}

#[derive(Default)]
struct ChatRoom {
    delivered: AtomicUsize,
}

#[listener]
impl ChatRoom {
    #[subscribe(priority = Last)]
    pub fn deliver(&self, message: &ChatMessage) {
        if message.is_cancelled() {
            return;
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
        println!("<{}> {}", message.author, message.text);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    // One worker keeps submission order visible as execution order.
    let dispatcher = Dispatcher::builder().with_max_worker_threads(1).build()?;

    let room = Arc::new(ChatRoom::default());
    dispatcher.register(&room);
    dispatcher.register(&Arc::new(Moderator {
        banned_words: vec!["spam", "scam"],
    }));

    for (author, text) in [
        ("alice", "hello everyone"),
        ("mallory", "cheap spam here"),
        ("bob", "hi alice"),
    ] {
        let message = dispatcher
            .fire(ChatMessage {
                author: author.to_string(),
                text: text.to_string(),
                ..Default::default()
            })?
            .wait()?;

        if message.is_cancelled() {
            println!("(message from {} was not delivered)", message.author);
        }
    }

    println!(
        "{} of 3 messages delivered",
        room.delivered.load(Ordering::SeqCst)
    );
    dispatcher.shutdown_default();

    Ok(())
}
