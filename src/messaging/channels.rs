// Lock-free communication channels between the contexts

use crate::messaging::command::PlayerCommand;
use crate::messaging::notification::PlayerNotification;
use ringbuf::{HeapRb, traits::Split};

pub type CommandProducer = ringbuf::HeapProd<PlayerCommand>;
pub type CommandConsumer = ringbuf::HeapCons<PlayerCommand>;

pub fn create_command_channel(capacity: usize) -> (CommandProducer, CommandConsumer) {
    let rb = HeapRb::<PlayerCommand>::new(capacity);
    rb.split()
}

pub type NotificationProducer = ringbuf::HeapProd<PlayerNotification>;
pub type NotificationConsumer = ringbuf::HeapCons<PlayerNotification>;

pub fn create_notification_channel(
    capacity: usize,
) -> (NotificationProducer, NotificationConsumer) {
    let rb = HeapRb::<PlayerNotification>::new(capacity);
    rb.split()
}
