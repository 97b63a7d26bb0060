//! buffers for reading and writing DNS packets

use derive_more::Display;

/// Classic DNS limit on UDP message size, and thus on our buffers.
pub const MAX_PACKET_SIZE: usize = 512;

/// Upper bound on compression pointer jumps while reading one name.
const MAX_JUMPS: usize = 5;

#[derive(Debug, Display)]
pub enum BufferError {
    #[display(fmt = "End of buffer")]
    EndOfBuffer,
    #[display(fmt = "Label exceeds 63 characters: {}", _0)]
    LabelTooLong(String),
    #[display(fmt = "Limit of {} jumps exceeded", _0)]
    JumpLimit(usize),
}

impl std::error::Error for BufferError {}

pub type Result<T> = std::result::Result<T, BufferError>;

pub trait PacketBuffer {
    fn read(&mut self) -> Result<u8>;
    fn get(&mut self, pos: usize) -> Result<u8>;
    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]>;
    fn write(&mut self, val: u8) -> Result<()>;
    fn set(&mut self, pos: usize, val: u8) -> Result<()>;
    fn pos(&self) -> usize;
    fn seek(&mut self, pos: usize) -> Result<()>;
    fn step(&mut self, steps: usize) -> Result<()>;

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.write(val)
    }

    fn write_u16(&mut self, val: u16) -> Result<()> {
        self.write((val >> 8) as u8)?;
        self.write((val & 0xFF) as u8)?;

        Ok(())
    }

    fn write_u32(&mut self, val: u32) -> Result<()> {
        self.write(((val >> 24) & 0xFF) as u8)?;
        self.write(((val >> 16) & 0xFF) as u8)?;
        self.write(((val >> 8) & 0xFF) as u8)?;
        self.write((val & 0xFF) as u8)?;

        Ok(())
    }

    fn set_u16(&mut self, pos: usize, val: u16) -> Result<()> {
        self.set(pos, (val >> 8) as u8)?;
        self.set(pos + 1, (val & 0xFF) as u8)?;

        Ok(())
    }

    /// Number of bytes `qname` occupies on the wire, without compression.
    fn qname_len(&self, qname: &str) -> usize {
        qname
            .split('.')
            .filter(|label| !label.is_empty())
            .map(|label| label.len() + 1)
            .sum::<usize>()
            + 1
    }

    fn write_qname(&mut self, qname: &str) -> Result<()> {
        // Empty labels are skipped, so "example.com." and "example.com" are
        // written identically and the root name "" becomes a single zero.
        for label in qname.split('.').filter(|label| !label.is_empty()) {
            let len = label.len();
            if len > 0x3f {
                return Err(BufferError::LabelTooLong(label.to_string()));
            }

            self.write_u8(len as u8)?;
            for b in label.as_bytes() {
                self.write_u8(*b)?;
            }
        }

        self.write_u8(0)?;

        Ok(())
    }

    fn read_u16(&mut self) -> Result<u16> {
        let res = ((self.read()? as u16) << 8) | (self.read()? as u16);

        Ok(res)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let res = ((self.read()? as u32) << 24)
            | ((self.read()? as u32) << 16)
            | ((self.read()? as u32) << 8)
            | (self.read()? as u32);

        Ok(res)
    }

    /// Read a qname
    ///
    /// The tricky part: Reading domain names, taking labels into consideration.
    /// Will take something like [3]www[6]google[3]com[0] and append
    /// www.google.com to outstr.
    fn read_qname(&mut self, outstr: &mut String) -> Result<()> {
        let mut pos = self.pos();
        let mut jumped = false;
        let mut jumps_performed = 0;

        let mut delim = "";
        loop {
            let len = self.get(pos)?;

            // A two byte sequence, where the two highest bits of the first byte is
            // set, represents a offset relative to the start of the buffer. We
            // handle this by jumping to the offset, setting a flag to indicate
            // that we shouldn't update the shared buffer position once done.
            if (len & 0xC0) == 0xC0 {
                // A crafted packet can point names at each other forever.
                if jumps_performed >= MAX_JUMPS {
                    return Err(BufferError::JumpLimit(MAX_JUMPS));
                }

                // When a jump is performed, we only modify the shared buffer
                // position once, and avoid making the change later on.
                if !jumped {
                    self.seek(pos + 2)?;
                }

                let b2 = self.get(pos + 1)? as u16;
                let offset = (((len as u16) ^ 0xC0) << 8) | b2;
                pos = offset as usize;
                jumped = true;
                jumps_performed += 1;
                continue;
            }

            pos += 1;

            // Names are terminated by an empty label of length 0
            if len == 0 {
                break;
            }

            outstr.push_str(delim);
            let label = self.get_range(pos, len as usize)?;
            outstr.push_str(&String::from_utf8_lossy(label));
            delim = ".";

            pos += len as usize;
        }

        if !jumped {
            self.seek(pos)?;
        }

        Ok(())
    }
}

pub struct BytePacketBuffer {
    pub buf: [u8; MAX_PACKET_SIZE],
    pub pos: usize,
    /// Bytes holding packet data, received or written. Reads stop here.
    len: usize,
}

impl BytePacketBuffer {
    /// This gives us a fresh buffer for holding the packet contents, and a field for
    /// keeping track of where we are.
    pub fn new() -> BytePacketBuffer {
        BytePacketBuffer {
            buf: [0; MAX_PACKET_SIZE],
            pos: 0,
            len: 0,
        }
    }

    /// Copy a received datagram into a fresh buffer. Anything past
    /// `MAX_PACKET_SIZE` is cut off, and reads past the end of `data` fail.
    pub fn from_slice(data: &[u8]) -> BytePacketBuffer {
        let mut buffer = BytePacketBuffer::new();
        let len = data.len().min(MAX_PACKET_SIZE);
        buffer.buf[..len].copy_from_slice(&data[..len]);
        buffer.len = len;

        buffer
    }

    /// Number of bytes that can be read.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The bytes written so far.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }
}

impl Default for BytePacketBuffer {
    fn default() -> Self {
        BytePacketBuffer::new()
    }
}

impl PacketBuffer for BytePacketBuffer {
    fn read(&mut self) -> Result<u8> {
        if self.pos >= self.len {
            return Err(BufferError::EndOfBuffer);
        }
        let res = self.buf[self.pos];
        self.pos += 1;

        Ok(res)
    }

    fn get(&mut self, pos: usize) -> Result<u8> {
        if pos >= self.len {
            return Err(BufferError::EndOfBuffer);
        }
        Ok(self.buf[pos])
    }

    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]> {
        if start + len > self.len {
            return Err(BufferError::EndOfBuffer);
        }
        Ok(&self.buf[start..start + len])
    }

    fn write(&mut self, val: u8) -> Result<()> {
        if self.pos >= MAX_PACKET_SIZE {
            return Err(BufferError::EndOfBuffer);
        }
        self.buf[self.pos] = val;
        self.pos += 1;
        self.len = self.len.max(self.pos);
        Ok(())
    }

    fn set(&mut self, pos: usize, val: u8) -> Result<()> {
        if pos >= MAX_PACKET_SIZE {
            return Err(BufferError::EndOfBuffer);
        }
        self.buf[pos] = val;
        self.len = self.len.max(pos + 1);

        Ok(())
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        self.pos = pos;

        Ok(())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        self.pos += steps;

        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_qname() {
        let mut buffer = BytePacketBuffer::new();

        let instr1 = "a.google.com".to_string();
        let instr2 = "b.google.com".to_string();

        // First write the standard string
        buffer.write_qname(&instr1).unwrap();

        // Then we set up a slightly different string, but this time we use a
        // jump back to the "google.com" part of the first name
        buffer.write_u8(1).unwrap();
        buffer.write_u8(b'b').unwrap();
        buffer.write_u8(0xC0).unwrap();
        buffer.write_u8(0x02).unwrap();

        let end_pos = buffer.pos();
        buffer.seek(0).unwrap();

        let mut outstr1 = String::new();
        buffer.read_qname(&mut outstr1).unwrap();
        assert_eq!(instr1, outstr1);

        let mut outstr2 = String::new();
        buffer.read_qname(&mut outstr2).unwrap();
        assert_eq!(instr2, outstr2);

        // Make sure we're now at the end of the buffer
        assert_eq!(end_pos, buffer.pos());
    }

    #[test]
    fn test_qname_trailing_dot_and_root() {
        let mut buffer = BytePacketBuffer::new();
        buffer.write_qname("example.com.").unwrap();
        buffer.write_qname("").unwrap();

        assert_eq!(buffer.qname_len("example.com."), 13);
        assert_eq!(buffer.qname_len(""), 1);
        assert_eq!(14, buffer.pos());

        buffer.seek(0).unwrap();
        let mut name = String::new();
        buffer.read_qname(&mut name).unwrap();
        assert_eq!("example.com", name);

        let mut root = String::new();
        buffer.read_qname(&mut root).unwrap();
        assert_eq!("", root);
    }

    #[test]
    fn test_label_too_long() {
        let mut buffer = BytePacketBuffer::new();
        let label = "a".repeat(64);

        match buffer.write_qname(&format!("{}.com", label)) {
            Err(BufferError::LabelTooLong(l)) => assert_eq!(label, l),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_pointer_loop() {
        let mut buffer = BytePacketBuffer::new();

        // A pointer to itself
        buffer.write_u8(0xC0).unwrap();
        buffer.write_u8(0x00).unwrap();
        buffer.seek(0).unwrap();

        let mut name = String::new();
        match buffer.read_qname(&mut name) {
            Err(BufferError::JumpLimit(n)) => assert_eq!(MAX_JUMPS, n),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_end_of_buffer() {
        let mut buffer = BytePacketBuffer::from_slice(&[0; MAX_PACKET_SIZE]);
        buffer.seek(MAX_PACKET_SIZE - 1).unwrap();

        assert!(buffer.read().is_ok());
        assert!(matches!(buffer.read(), Err(BufferError::EndOfBuffer)));
        assert!(matches!(
            buffer.get_range(MAX_PACKET_SIZE - 2, 3),
            Err(BufferError::EndOfBuffer)
        ));
    }

    #[test]
    fn test_from_slice() {
        let buffer = BytePacketBuffer::from_slice(&[1, 2, 3]);
        assert_eq!(&[1, 2, 3, 0], &buffer.buf[..4]);
        assert_eq!(0, buffer.pos());
        assert_eq!(3, buffer.len());

        let oversized = vec![0xAB; MAX_PACKET_SIZE + 10];
        let buffer = BytePacketBuffer::from_slice(&oversized);
        assert_eq!(0xAB, buffer.buf[MAX_PACKET_SIZE - 1]);
        assert_eq!(MAX_PACKET_SIZE, buffer.len());
    }

    #[test]
    fn test_reads_stop_at_received_length() {
        let mut buffer = BytePacketBuffer::from_slice(&[0xAB, 0xCD, 3]);

        assert_eq!(0xABCD, buffer.read_u16().unwrap());
        assert!(matches!(buffer.read_u16(), Err(BufferError::EndOfBuffer)));
        assert!(matches!(buffer.get(3), Err(BufferError::EndOfBuffer)));

        // A label running past the received bytes
        buffer.seek(2).unwrap();
        let mut name = String::new();
        assert!(matches!(
            buffer.read_qname(&mut name),
            Err(BufferError::EndOfBuffer)
        ));
    }

    #[test]
    fn test_written_bytes_are_readable() {
        let mut buffer = BytePacketBuffer::new();
        assert!(buffer.is_empty());
        assert!(matches!(buffer.read(), Err(BufferError::EndOfBuffer)));

        buffer.write_u16(0x1234).unwrap();
        buffer.seek(0).unwrap();
        assert_eq!(2, buffer.len());
        assert_eq!(0x1234, buffer.read_u16().unwrap());
        assert!(matches!(buffer.read(), Err(BufferError::EndOfBuffer)));
    }
}
