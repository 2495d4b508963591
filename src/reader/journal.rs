//! The journal FFI binding.
//!
//! Only the interface the reader needs is modelled here: a source of
//! entries with positional cursors and a blocking wait. The
//! production implementation loads `libsystemd.so` at runtime with `dlopen`
//! rather than link against it at build time, following the same posture as
//! the upstream `journald` crate this is modelled on.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use dlopen::wrapper::{Container, WrapperApi};
use dlopen_derive::WrapperApi;
use libc::{c_char, c_int, size_t};
use std::ffi::{CStr, CString};
use std::ptr::null_mut;

pub type Record = HashMap<String, String>;

/// What the reader needs from a journal: step to the next entry, read its
/// fields, get the opaque cursor just past the current entry, seek to a
/// previously persisted cursor or to head, and block until more data is
/// available. A fake, in-memory implementation of this trait backs the unit
/// tests in `reader.rs`.
pub trait JournalSource {
    /// Advances to the next entry. Returns `Ok(true)` if an entry is now
    /// available, `Ok(false)` if the journal currently has nothing more.
    fn step(&mut self) -> io::Result<bool>;

    /// Reads the fields of the entry the last successful `step` advanced to.
    fn get_entry(&mut self) -> io::Result<Record>;

    /// The opaque position just past the current entry.
    fn get_cursor(&mut self) -> io::Result<String>;

    /// The current entry's own recorded timestamps: wall-clock microseconds
    /// since the epoch, and monotonic microseconds since boot. Read from the
    /// journal entry itself, not the time the reader happens to process it --
    /// those diverge whenever the reader is catching up on a backlog.
    fn get_timestamps(&mut self) -> io::Result<(u64, u64)>;

    /// Seeks to a previously persisted cursor. The journal rejecting a
    /// cursor it doesn't recognise is a fatal startup error -- a silent
    /// mis-seek could reship the whole journal from head.
    fn seek_cursor(&mut self, cursor: &str) -> io::Result<()>;

    fn seek_head(&mut self) -> io::Result<()>;

    /// Blocks until more data is available or `timeout` elapses. `None`
    /// means wait indefinitely.
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

const SD_JOURNAL_LOCAL_ONLY: c_int = 1;

#[allow(non_camel_case_types)]
enum sd_journal {}

#[derive(WrapperApi)]
struct LibSystemd {
    sd_journal_open: extern "C" fn(ret: *mut *mut sd_journal, flags: c_int) -> c_int,
    sd_journal_next: extern "C" fn(j: *mut sd_journal) -> c_int,
    sd_journal_seek_head: extern "C" fn(j: *mut sd_journal) -> c_int,
    sd_journal_seek_cursor: extern "C" fn(j: *mut sd_journal, cursor: *const c_char) -> c_int,
    sd_journal_get_cursor: extern "C" fn(j: *mut sd_journal, cursor: *mut *mut c_char) -> c_int,
    sd_journal_get_realtime_usec: extern "C" fn(j: *mut sd_journal, ret: *mut u64) -> c_int,
    sd_journal_get_monotonic_usec:
        extern "C" fn(j: *mut sd_journal, ret: *mut u64, ret_boot_id: *mut u8) -> c_int,
    sd_journal_wait: extern "C" fn(j: *mut sd_journal, timeout_usec: u64) -> c_int,
    sd_journal_restart_data: extern "C" fn(j: *mut sd_journal),
    sd_journal_enumerate_data:
        extern "C" fn(j: *mut sd_journal, data: *const *mut u8, l: *mut size_t) -> c_int,
}

/// `sd_journal_wait`'s sentinel for "wait forever" (`(uint64_t) -1`).
const SD_JOURNAL_WAIT_INDEFINITE: u64 = u64::MAX;

fn load_lib() -> Result<Container<LibSystemd>, dlopen::Error> {
    unsafe { Container::load("libsystemd.so") }
}

fn sd_result(code: c_int) -> io::Result<c_int> {
    if code < 0 {
        Err(io::Error::from_raw_os_error(-code))
    } else {
        Ok(code)
    }
}

pub struct SystemdJournalSource {
    lib: Container<LibSystemd>,
    journal: *mut sd_journal,
}

unsafe impl Send for SystemdJournalSource {}

impl SystemdJournalSource {
    pub fn open() -> io::Result<Self> {
        let lib = load_lib().map_err(|err| io::Error::other(err.to_string()))?;
        let mut journal = null_mut();
        sd_result(lib.sd_journal_open(&mut journal, SD_JOURNAL_LOCAL_ONLY))?;
        Ok(Self { lib, journal })
    }
}

impl JournalSource for SystemdJournalSource {
    fn step(&mut self) -> io::Result<bool> {
        let n = sd_result(self.lib.sd_journal_next(self.journal))?;
        Ok(n != 0)
    }

    fn get_entry(&mut self) -> io::Result<Record> {
        self.lib.sd_journal_restart_data(self.journal);
        let mut record = Record::new();
        loop {
            let mut size: size_t = 0;
            let data: *mut u8 = null_mut();
            let n = sd_result(
                self.lib
                    .sd_journal_enumerate_data(self.journal, &data, &mut size),
            )?;
            if n == 0 {
                break;
            }
            let bytes = unsafe { std::slice::from_raw_parts(data, size) };
            let field = String::from_utf8_lossy(bytes);
            if let Some(eq) = field.find('=') {
                record.insert(field[..eq].to_owned(), field[eq + 1..].to_owned());
            }
        }
        Ok(record)
    }

    fn get_cursor(&mut self) -> io::Result<String> {
        let mut cursor: *mut c_char = null_mut();
        sd_result(self.lib.sd_journal_get_cursor(self.journal, &mut cursor))?;
        let owned = unsafe { CStr::from_ptr(cursor) }.to_string_lossy().into_owned();
        unsafe { libc::free(cursor as *mut libc::c_void) };
        Ok(owned)
    }

    fn get_timestamps(&mut self) -> io::Result<(u64, u64)> {
        let mut realtime: u64 = 0;
        sd_result(self.lib.sd_journal_get_realtime_usec(self.journal, &mut realtime))?;
        let mut monotonic: u64 = 0;
        // `ret_boot_id` may be NULL; we only ever compare monotonic times
        // within a single boot.
        sd_result(
            self.lib
                .sd_journal_get_monotonic_usec(self.journal, &mut monotonic, null_mut()),
        )?;
        Ok((realtime, monotonic))
    }

    fn seek_cursor(&mut self, cursor: &str) -> io::Result<()> {
        let c = CString::new(cursor).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        sd_result(self.lib.sd_journal_seek_cursor(self.journal, c.as_ptr()))?;
        Ok(())
    }

    fn seek_head(&mut self) -> io::Result<()> {
        sd_result(self.lib.sd_journal_seek_head(self.journal))?;
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let usec = match timeout {
            None => SD_JOURNAL_WAIT_INDEFINITE,
            Some(d) => d.as_micros().min(u128::from(u64::MAX)) as u64,
        };
        sd_result(self.lib.sd_journal_wait(self.journal, usec))?;
        Ok(())
    }
}

#[cfg(any(test, feature = "test_util"))]
pub mod fake {
    //! An in-memory [`JournalSource`] used to unit test the reader loop
    //! without a real journal.

    use super::*;
    use std::collections::VecDeque;

    pub struct FakeJournalSource {
        pub entries: VecDeque<(String, Record)>,
        current: Option<(String, Record)>,
        pub seek_cursor_rejects: bool,
    }

    impl FakeJournalSource {
        pub fn new(entries: Vec<(String, Record)>) -> Self {
            Self {
                entries: entries.into(),
                current: None,
                seek_cursor_rejects: false,
            }
        }
    }

    impl JournalSource for FakeJournalSource {
        fn step(&mut self) -> io::Result<bool> {
            self.current = self.entries.pop_front();
            Ok(self.current.is_some())
        }

        fn get_entry(&mut self) -> io::Result<Record> {
            Ok(self
                .current
                .clone()
                .map(|(_, record)| record)
                .unwrap_or_default())
        }

        fn get_cursor(&mut self) -> io::Result<String> {
            Ok(self
                .current
                .clone()
                .map(|(cursor, _)| cursor)
                .unwrap_or_default())
        }

        /// This fake doesn't model real journal timestamps; every entry
        /// reads back as `(0, 0)`.
        fn get_timestamps(&mut self) -> io::Result<(u64, u64)> {
            Ok((0, 0))
        }

        fn seek_cursor(&mut self, _cursor: &str) -> io::Result<()> {
            if self.seek_cursor_rejects {
                Err(io::Error::new(io::ErrorKind::InvalidInput, "bad cursor"))
            } else {
                Ok(())
            }
        }

        fn seek_head(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn wait(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }
}
