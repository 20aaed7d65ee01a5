pub mod quickstream;

pub use quickstream::QuickStream;
