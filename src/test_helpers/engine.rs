use crate::engine::{Mode, ModeEngine, ModeStore, Rgb};

const MAGIC: [u8; 4] = *b"LSTE";

/// Byte-stream engine with a real header and checksum.
///
/// Layout: magic (4) + payload length u32 LE (4) + FNV-1a u32 LE (4) +
/// payload, so the first payload byte sits at offset 12 like a real engine
/// stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestEngine;

fn fnv1a(data: &[u8]) -> u32 {
    data.iter()
        .fold(0x811C_9DC5u32, |h, &b| (h ^ b as u32).wrapping_mul(0x0100_0193))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let b = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

impl ModeEngine for TestEngine {
    fn pack_save(&self, store: &ModeStore) -> Result<Vec<u8>, String> {
        let mut raw = (store.len() as u32).to_le_bytes().to_vec();
        for mode in &store.modes {
            raw.extend_from_slice(&(mode.stream.len() as u32).to_le_bytes());
            raw.extend_from_slice(&mode.stream);
        }
        Ok(self.wrap(&raw))
    }

    fn unpack_save(&self, save: &[u8]) -> Result<ModeStore, String> {
        let raw = self.unwrap(save)?;
        let count = read_u32(&raw, 0).ok_or("save too short")? as usize;

        let mut modes = Vec::with_capacity(count);
        let mut at = 4;
        for _ in 0..count {
            let len = read_u32(&raw, at).ok_or("truncated mode length")? as usize;
            at += 4;
            let stream = raw.get(at..at + len).ok_or("truncated mode")?;
            modes.push(Mode::new(stream.to_vec()));
            at += len;
        }
        Ok(ModeStore::new(modes))
    }

    fn solid_color_mode(&self, color: Rgb) -> Result<Mode, String> {
        Ok(Mode::new(self.wrap(&[color.red, color.green, color.blue])))
    }

    fn wrap(&self, raw: &[u8]) -> Vec<u8> {
        let mut stream = Vec::with_capacity(12 + raw.len());
        stream.extend_from_slice(&MAGIC);
        stream.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        stream.extend_from_slice(&fnv1a(raw).to_le_bytes());
        stream.extend_from_slice(raw);
        stream
    }

    fn unwrap(&self, stream: &[u8]) -> Result<Vec<u8>, String> {
        if stream.get(..4) != Some(&MAGIC[..]) {
            return Err("bad magic".into());
        }
        let len = read_u32(stream, 4).ok_or("short header")? as usize;
        let checksum = read_u32(stream, 8).ok_or("short header")?;
        let raw = stream.get(12..).ok_or("short header")?;
        if raw.len() != len {
            return Err(format!("length {} but header says {}", raw.len(), len));
        }
        if fnv1a(raw) != checksum {
            return Err("checksum mismatch".into());
        }
        Ok(raw.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_puts_payload_at_offset_12() {
        let stream = TestEngine.wrap(&[42]);
        assert_eq!(stream.len(), 13);
        assert_eq!(stream[12], 42);
        assert_eq!(TestEngine.unwrap(&stream).unwrap(), vec![42]);
    }

    #[test]
    fn test_flipped_byte_fails_unwrap() {
        let mut stream = TestEngine.wrap(b"abc");
        stream[13] ^= 0xFF;
        assert!(TestEngine.unwrap(&stream).is_err());
    }

    #[test]
    fn test_save_roundtrip() {
        let store = ModeStore::new(vec![Mode::new(vec![1, 2]), Mode::new(vec![])]);
        let save = TestEngine.pack_save(&store).unwrap();
        assert_eq!(TestEngine.unpack_save(&save).unwrap(), store);
    }
}
