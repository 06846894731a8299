use std::io;

/// Writes a message body into a reusable buffer.
pub trait Serialize<'a> {
    /// Serializes `self` into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer to append the serialized header bytes to.
    ///
    /// # Returns
    /// An optional trailing slice that must be written right after `buf`, used to
    /// avoid copying large payloads, or an `io::Error` if serialization fails.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}
