use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode one frame: `[u32: len][bincode: Vec<Event>][u32: crc32]`.
fn encode_frame(writer: &mut impl Write, events: &[Event]) -> io::Result<()> {
    let payload =
        bincode::serialize(events).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only write-ahead log.
///
/// Each frame carries a whole transaction (one or more events) so a booking
/// plus its deposit, or a refund plus the cancellation that caused it, either
/// replays completely or not at all. A truncated or corrupt trailing frame
/// (crash mid-write) is discarded on replay via the length prefix + CRC.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    frames_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            frames_since_compact: 0,
        })
    }

    /// Append one transaction and fsync. Tests only — production goes
    /// through `append_buffered` + `flush_sync` for group commit.
    #[cfg(test)]
    pub fn append(&mut self, events: &[Event]) -> io::Result<()> {
        self.append_buffered(events)?;
        self.flush_sync()
    }

    /// Buffer one transaction without flushing. Call `flush_sync()` after
    /// the batch to durably commit everything buffered.
    pub fn append_buffered(&mut self, events: &[Event]) -> io::Result<()> {
        encode_frame(&mut self.writer, events)?;
        self.frames_since_compact += 1;
        Ok(())
    }

    /// Flush the buffer and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a compacted replacement to a temp file and fsync it. Slow I/O
    /// phase — runs before the swap so the live WAL stays untouched.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_frame(&mut writer, std::slice::from_ref(event))?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Atomic swap: rename the temp file over the WAL and reopen.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.frames_since_compact = 0;
        Ok(())
    }

    /// Both compaction phases in one call. Tests only.
    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn frames_since_compact(&self) -> u64 {
        self.frames_since_compact
    }

    /// Replay the WAL, returning all events from intact frames in order.
    /// Truncated or corrupt trailing frames are silently dropped.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break; // corrupt frame — stop replaying
            }

            match bincode::deserialize::<Vec<Event>>(&payload) {
                Ok(frame) => events.extend(frame),
                Err(_) => break, // corrupt payload
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stay;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn room_event() -> Event {
        Event::RoomCreated {
            id: Ulid::new(),
            room_type_id: Ulid::new(),
            number: "101".into(),
            rate_override: None,
        }
    }

    fn booking_event(room_id: Ulid) -> Event {
        Event::BookingCreated {
            id: Ulid::new(),
            room_id,
            reference: crate::model::reference_code(),
            guest_id: Ulid::new(),
            stay: Stay::new(d("2025-03-01"), d("2025-03-05")),
            adults: 2,
            children: 0,
            source: crate::model::BookingSource::Online,
            notes: None,
            total: 12_000,
            status: crate::model::BookingStatus::Pending,
            at: chrono::Utc::now(),
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let _ = fs::remove_file(&path);

        let rid = Ulid::new();
        let frames = vec![vec![room_event()], vec![booking_event(rid)]];

        {
            let mut wal = Wal::open(&path).unwrap();
            for f in &frames {
                wal.append(f).unwrap();
            }
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0], frames[0][0]);
        assert_eq!(replayed[1], frames[1][0]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn multi_event_frame_replays_whole() {
        let path = tmp_path("multi_event_frame.wal");
        let _ = fs::remove_file(&path);

        let rid = Ulid::new();
        let frame = vec![booking_event(rid), booking_event(rid)];
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&frame).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, frame);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let _ = fs::remove_file(&path);

        let event = room_event();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(std::slice::from_ref(&event)).unwrap();
        }

        // Garbage trailing bytes simulate a crash mid-frame.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0], event);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let _ = fs::remove_file(&path);
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let _ = fs::remove_file(&path);

        let payload = bincode::serialize(&vec![room_event()]).unwrap();
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_reduces_wal() {
        let path = tmp_path("compact_reduce.wal");
        let _ = fs::remove_file(&path);

        let keep = room_event();
        let rid = match keep {
            Event::RoomCreated { id, .. } => id,
            _ => unreachable!(),
        };

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(std::slice::from_ref(&keep)).unwrap();
            // Churn: bookings that will not survive compaction.
            for _ in 0..20 {
                wal.append(&[booking_event(rid)]).unwrap();
            }
        }

        let before = fs::metadata(&path).unwrap().len();

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(std::slice::from_ref(&keep)).unwrap();
            assert_eq!(wal.frames_since_compact(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should shrink: {after} < {before}");

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![keep]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let _ = fs::remove_file(&path);

        let keep = room_event();
        let rid = match keep {
            Event::RoomCreated { id, .. } => id,
            _ => unreachable!(),
        };
        let fresh = booking_event(rid);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(std::slice::from_ref(&keep)).unwrap();
            wal.compact(std::slice::from_ref(&keep)).unwrap();
            wal.append(std::slice::from_ref(&fresh)).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![keep, fresh]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.wal");
        let _ = fs::remove_file(&path);

        let frames: Vec<Event> = (0..5).map(|_| room_event()).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &frames {
                wal.append_buffered(std::slice::from_ref(e)).unwrap();
            }
            assert_eq!(wal.frames_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), frames);
        let _ = fs::remove_file(&path);
    }
}
