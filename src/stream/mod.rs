pub mod decoder;
pub mod subscriber;
pub mod transport;
