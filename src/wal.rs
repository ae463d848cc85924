use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode a single event to `[len][bincode][crc32]` format. Returns the
/// number of bytes the frame occupies.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event larger than 4 GiB"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(frame_len(len))
}

fn frame_len(payload_len: u32) -> u64 {
    4 + u64::from(payload_len) + 4
}

enum Frame {
    /// A decoded event and the size of its frame in bytes.
    Event(Event, u64),
    /// Clean end of file.
    End,
    /// Truncated or corrupt entry; nothing after it is trusted.
    Damaged,
}

/// Read `buf.len()` bytes; `Ok(false)` on EOF before the buffer is filled.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn decode_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    match reader.read(&mut len_buf[..1])? {
        0 => return Ok(Frame::End),
        _ => {
            if !read_full(reader, &mut len_buf[1..])? {
                return Ok(Frame::Damaged);
            }
        }
    }
    let len = u32::from_le_bytes(len_buf);

    let mut payload = vec![0u8; len as usize];
    if !read_full(reader, &mut payload)? {
        return Ok(Frame::Damaged);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(Frame::Damaged);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Damaged);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Frame::Event(event, frame_len(len))),
        Err(_) => Ok(Frame::Damaged),
    }
}

/// Result of reading a WAL from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// True when a truncated or corrupt tail was dropped.
    pub discarded_tail: bool,
    /// Byte length of the intact prefix holding `events`.
    pub valid_len: u64,
}

/// Append-only write-ahead log of fleet [`Event`]s.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// A torn last entry (crash mid-write) fails the length or CRC check and is
/// dropped on replay along with anything after it.
///
/// The file never holds bytes past the last successful [`Wal::flush_sync`]
/// for long: a failed batch is cut off again by [`Wal::rollback`].
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length after the last successful sync.
    committed_len: u64,
    pending_bytes: u64,
    pending_appends: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`. The file must end on a frame
    /// boundary; cut a damaged tail with [`Wal::truncate`] first.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed_len,
            pending_bytes: 0,
            pending_appends: 0,
            appends_since_compact: 0,
        })
    }

    /// Cut the file at `path` back to `len` bytes and sync.
    pub fn truncate(path: &Path, len: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_all()
    }

    /// Append and fsync a single event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without syncing. Follow a batch with `flush_sync()`,
    /// or `rollback()` if any part of the batch failed.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.pending_bytes += encode_event(&mut self.writer, event)?;
        self.pending_appends += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file. Only now do the
    /// buffered events count as committed.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len += self.pending_bytes;
        self.appends_since_compact += self.pending_appends;
        self.pending_bytes = 0;
        self.pending_appends = 0;
        Ok(())
    }

    /// Forget everything since the last successful sync: drop the unwritten
    /// buffer and cut any partial frame off the file.
    pub fn rollback(&mut self) -> io::Result<()> {
        let fresh = self.writer.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(fresh));
        // `into_parts` hands back the buffer instead of flushing it.
        let (file, _unwritten) = stale.into_parts();
        self.pending_bytes = 0;
        self.pending_appends = 0;
        file.set_len(self.committed_len)?;
        file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: write a synced temp file, then rename
    /// it over the live file and reopen for appending.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        self.flush_sync()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut written = 0;
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                written += encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.committed_len = written;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Read every intact event from `path`. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        loop {
            match decode_frame(&mut reader)? {
                Frame::Event(event, len) => {
                    replay.events.push(event);
                    replay.valid_len += len;
                }
                Frame::End => break,
                Frame::Damaged => {
                    replay.discarded_tail = true;
                    break;
                }
            }
        }
        Ok(replay)
    }
}
