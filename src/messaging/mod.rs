// Cross-context plumbing: command/notification rings and the worker

pub mod channels;
pub mod command;
pub mod notification;
pub mod worker;

pub use channels::{
    CommandConsumer, CommandProducer, NotificationConsumer, NotificationProducer,
    create_command_channel, create_notification_channel,
};
pub use command::PlayerCommand;
pub use notification::PlayerNotification;
pub use worker::BackgroundWorker;
