//! Backing object: the shared state behind one bus.
//!
//! A bus is a regular file holding a [`SharedState`] that every process maps
//! with `MAP_SHARED`. All fields are atomics, so a shared reference into the
//! mapping is sound from any number of processes and threads.
//!
//! Layout:
//! ```text
//! magic | version | delivery | wake | roster (generation:32 | listeners:32)
//! acked | expected | seal | len | msg_generation | slot[2048]
//! ```
//!
//! The roster packs the broadcast generation and the listener count into one
//! word so that registration and the broadcaster's wake step are ordered by
//! a single atomic modification order.

use std::fs::File;
use std::hint;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::thread;

use serde::Deserialize;

use crate::error::{BusError, Result};

/// Largest message a bus carries, in bytes.
pub const MESSAGE_MAX: usize = 2047;

const SLOT_SIZE: usize = MESSAGE_MAX + 1;
const SLOT_WORDS: usize = SLOT_SIZE / 8;

const MAGIC: u32 = u32::from_be_bytes(*b"BUSC");
const VERSION: u32 = 1;

const LISTENER_MASK: u64 = 0xFFFF_FFFF;
const GENERATION_UNIT: u64 = 1 << 32;

/// Size of the backing file.
pub const OBJECT_SIZE: usize = std::mem::size_of::<SharedState>();

/// Acknowledgment discipline of a bus, fixed at creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// A broadcast does not replace the slot until every listener counted for
    /// the previous one has copied it out. No registered listener ever misses
    /// a message.
    #[default]
    Acknowledged,
    /// A broadcast returns right after waking listeners. Slow listeners may
    /// skip messages but never see them out of order or torn.
    FireAndForget,
}

impl Delivery {
    fn code(self) -> u32 {
        match self {
            Delivery::Acknowledged => 1,
            Delivery::FireAndForget => 2,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Delivery::Acknowledged),
            2 => Some(Delivery::FireAndForget),
            _ => None,
        }
    }
}

#[repr(C)]
pub(crate) struct SharedState {
    magic: AtomicU32,
    version: AtomicU32,
    delivery: AtomicU32,
    /// Futex word: low 32 bits of the latest published generation.
    wake: AtomicU32,
    roster: AtomicU64,
    /// Acknowledgments received for the latest generation.
    acked: AtomicU32,
    /// Acknowledgments the latest generation needs before the slot is reused.
    expected: AtomicU32,
    /// Seqlock over `len`, `msg_generation` and `slot`. Odd while writing.
    seal: AtomicU32,
    len: AtomicU32,
    msg_generation: AtomicU32,
    slot: [AtomicU64; SLOT_WORDS],
}

fn generation_of(roster: u64) -> u32 {
    (roster >> 32) as u32
}

fn listeners_of(roster: u64) -> u32 {
    (roster & LISTENER_MASK) as u32
}

impl SharedState {
    fn initialize(&self, delivery: Delivery) {
        self.version.store(VERSION, Ordering::Relaxed);
        self.delivery.store(delivery.code(), Ordering::Relaxed);
        self.magic.store(MAGIC, Ordering::Release);
    }

    fn validate(&self) -> std::result::Result<Delivery, String> {
        if self.magic.load(Ordering::Acquire) != MAGIC {
            return Err("bad magic".to_string());
        }
        let version = self.version.load(Ordering::Relaxed);
        if version != VERSION {
            return Err(format!("unsupported version {}", version));
        }
        let code = self.delivery.load(Ordering::Relaxed);
        Delivery::from_code(code).ok_or_else(|| format!("unknown delivery policy {}", code))
    }

    /// Current `(generation, listener count)`.
    pub(crate) fn snapshot(&self) -> (u32, u32) {
        let roster = self.roster.load(Ordering::SeqCst);
        (generation_of(roster), listeners_of(roster))
    }

    /// Add one listener; returns the generation it starts from.
    pub(crate) fn register(&self) -> u32 {
        generation_of(self.roster.fetch_add(1, Ordering::SeqCst))
    }

    /// Remove one listener; returns the generation at removal.
    pub(crate) fn deregister(&self) -> u32 {
        generation_of(self.roster.fetch_sub(1, Ordering::SeqCst))
    }

    /// Bump the generation; returns the new generation and the number of
    /// listeners registered at that instant.
    pub(crate) fn advance(&self) -> (u32, u32) {
        let prev = self.roster.fetch_add(GENERATION_UNIT, Ordering::SeqCst);
        (generation_of(prev).wrapping_add(1), listeners_of(prev))
    }

    pub(crate) fn wake_word(&self) -> &AtomicU32 {
        &self.wake
    }

    pub(crate) fn ack_word(&self) -> &AtomicU32 {
        &self.acked
    }

    pub(crate) fn expected_acks(&self) -> u32 {
        self.expected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_expected_acks(&self, count: u32) {
        self.expected.store(count, Ordering::SeqCst);
    }

    /// Copy `message` into the slot. Caller holds the write lock.
    pub(crate) fn store_message(&self, generation: u32, message: &[u8]) {
        // An odd value left behind by a writer that died mid-store is reused.
        let seal = self.seal.load(Ordering::Relaxed) | 1;
        self.seal.store(seal, Ordering::Relaxed);
        fence(Ordering::Release);

        for (word, chunk) in self.slot.iter().zip(message.chunks(8)) {
            let mut bytes = [0u8; 8];
            bytes[..chunk.len()].copy_from_slice(chunk);
            word.store(u64::from_ne_bytes(bytes), Ordering::Relaxed);
        }
        self.len.store(message.len() as u32, Ordering::Relaxed);
        self.msg_generation.store(generation, Ordering::Relaxed);

        self.seal.store(seal.wrapping_add(1), Ordering::Release);
    }

    /// Copy the slot out; returns the generation it was written for.
    pub(crate) fn load_message(&self) -> (u32, Vec<u8>) {
        loop {
            let before = self.seal.load(Ordering::Acquire);
            if before & 1 == 1 {
                hint::spin_loop();
                thread::yield_now();
                continue;
            }

            let len = (self.len.load(Ordering::Relaxed) as usize).min(MESSAGE_MAX);
            let generation = self.msg_generation.load(Ordering::Relaxed);
            let mut out = Vec::with_capacity(len.div_ceil(8) * 8);
            for word in self.slot.iter().take(len.div_ceil(8)) {
                out.extend_from_slice(&word.load(Ordering::Relaxed).to_ne_bytes());
            }
            out.truncate(len);

            fence(Ordering::Acquire);
            if self.seal.load(Ordering::Relaxed) == before {
                return (generation, out);
            }
        }
    }
}

/// A process-local `MAP_SHARED` view of a backing file.
pub(crate) struct Mapping {
    ptr: NonNull<SharedState>,
}

// Safety: SharedState is made only of atomics and the mapping is never
// remapped while a reference is live.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    fn map(file: &File) -> io::Result<Self> {
        // Safety: the file is at least OBJECT_SIZE bytes (checked or set by
        // callers) and the mapping is released in Drop.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                OBJECT_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(ptr as *mut SharedState)
            .map(|ptr| Self { ptr })
            .ok_or_else(|| io::Error::other("mmap returned null"))
    }

    pub(crate) fn state(&self) -> &SharedState {
        // Safety: ptr is a live, page-aligned mapping of OBJECT_SIZE bytes.
        unsafe { self.ptr.as_ref() }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // Safety: ptr/OBJECT_SIZE came from a successful mmap.
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, OBJECT_SIZE);
        }
    }
}

/// Size a fresh file and write an empty bus header into it.
pub(crate) fn initialize(file: &File, delivery: Delivery) -> io::Result<()> {
    file.set_len(OBJECT_SIZE as u64)?;
    let mapping = Mapping::map(file)?;
    mapping.state().initialize(delivery);
    Ok(())
}

/// Map an existing backing file and check its header.
pub(crate) fn attach(file: &File, path: &Path) -> Result<(Mapping, Delivery)> {
    let len = file
        .metadata()
        .map_err(|e| BusError::from_io(e, path))?
        .len();
    if len < OBJECT_SIZE as u64 {
        return Err(BusError::InvalidObject {
            path: path.to_path_buf(),
            reason: format!("file is {} bytes, expected {}", len, OBJECT_SIZE),
        });
    }

    let mapping = Mapping::map(file).map_err(|e| BusError::from_io(e, path))?;
    let delivery = mapping
        .state()
        .validate()
        .map_err(|reason| BusError::InvalidObject {
            path: path.to_path_buf(),
            reason,
        })?;
    Ok((mapping, delivery))
}
