//! Network subsystem for UDP media transport

pub mod udp;
pub mod sender;
pub mod receiver;

pub use udp::bind_udp;
pub use sender::{MediaSender, MediaSockets, SenderStats};
pub use receiver::{spawn_receive_loop, DatagramHandler, ReceiveCounters, ReceiverStats};
