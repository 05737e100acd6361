//! Wire protocol: message types and the 28-byte packet header codec.
//!
//! ```text
//! +-------+---------+------+-------+------------+---------+--------+---------+
//! | magic | version | type | flags | session_id | seq_num | length | address |
//! |   4   |    2    |  1   |   1   |     4      |    4    |   4    |    8    |
//! +-------+---------+------+-------+------------+---------+--------+---------+
//! ```
//!
//! All integers are big-endian. The header is followed by `length` payload
//! bytes, except for read requests where `length` is the requested size and
//! nothing follows.

mod message;
mod packet;

pub use message::*;
pub use packet::*;
