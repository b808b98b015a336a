//! Descriptor slots and the caller-facing descriptor handle
//!
//! A `Slot` lives in its core's ring for the whole life of the system and
//! is reinitialised in place on every reuse. Its state bits are a single
//! atomic byte driven exclusively through `DescFlags::apply`, so every
//! state change is validated by one transition function. Everything else
//! (buffer vector, sector, chain link, callback) sits behind a short
//! spinlock.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};

use smallvec::SmallVec;

use descring_core::constants::INLINE_VECS;
use descring_core::{kbug, kerror};
use descring_core::{
    CommandId, CoreId, DescError, DescFlags, DescResult, SlotStatus, SlotTag, SpinLock,
    StateError, Transition,
};

use crate::collab::{DmaAddr, MapDirection};
use crate::lists::NO_LINK;
use crate::memory::PageFrame;
use crate::parking::{Parking, PlatformParking};
use crate::stats::CoreStats;
use crate::system::CoreContext;

/// Outcome of the transfer, recorded at completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoStatus {
    /// Not completed yet
    #[default]
    Pending,
    Ok,
    /// Device error (errno-style code)
    Error(i32),
}

impl IoStatus {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == IoStatus::Ok
    }
}

/// Completion callback, run once when the device confirms the transfer
pub type EndIo = Box<dyn FnOnce(SlotTag, IoStatus) + Send>;

/// Where a buffer goes when its descriptor is reclaimed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Back to the reclaiming core's pool, mapping retained
    Pool,
    /// Owned by the page cache; nothing to do
    Cache,
    /// Unmap and free
    Discard,
}

/// One buffer entry of a descriptor
pub struct DescVec {
    /// `None` once the page passed to the cache
    pub(crate) page: Option<PageFrame>,
    pub(crate) dma: DmaAddr,
    pub(crate) disposition: Disposition,
}

impl DescVec {
    #[inline]
    pub fn dma(&self) -> DmaAddr {
        self.dma
    }

    #[inline]
    pub fn page(&self) -> Option<&PageFrame> {
        self.page.as_ref()
    }

    #[inline]
    pub fn page_mut(&mut self) -> Option<&mut PageFrame> {
        self.page.as_mut()
    }

    #[inline]
    pub fn disposition(&self) -> Disposition {
        self.disposition
    }
}

impl fmt::Debug for DescVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescVec")
            .field("dma", &self.dma)
            .field("attached", &self.page.is_some())
            .field("disposition", &self.disposition)
            .finish()
    }
}

pub(crate) type VecStore = SmallVec<[DescVec; INLINE_VECS]>;

/// Mutable part of a descriptor
pub(crate) struct DescBody {
    pub(crate) vecs: VecStore,
    pub(crate) max_vecs: usize,
    pub(crate) sector: u64,
    pub(crate) chain_next: Option<SlotTag>,
    pub(crate) status: IoStatus,
    pub(crate) end_io: Option<EndIo>,
    pub(crate) scratch: Option<Box<dyn Any + Send>>,
}

impl DescBody {
    fn new() -> Self {
        Self {
            vecs: SmallVec::new(),
            max_vecs: 0,
            sector: 0,
            chain_next: None,
            status: IoStatus::Pending,
            end_io: None,
            scratch: None,
        }
    }

    /// Drop the heap block of an oversized vector so the next use starts inline
    pub(crate) fn shrink_vecs(&mut self) {
        debug_assert!(self.vecs.is_empty());
        if self.vecs.spilled() {
            self.vecs = SmallVec::new();
        }
    }
}

/// One descriptor slot of a ring
pub(crate) struct Slot {
    pub(crate) tag: SlotTag,
    flags: AtomicU8,
    /// Core whose lazy or final list holds this slot (`CoreId::NONE` if none)
    lazy_core: AtomicU16,
    /// Final list link (encoded tag, `NO_LINK` at the tail)
    pub(crate) final_next: AtomicU32,
    /// Allocators waiting for this slot
    pub(crate) parking: PlatformParking,
    pub(crate) body: SpinLock<DescBody>,
}

impl Slot {
    pub(crate) fn new(tag: SlotTag) -> Self {
        Self {
            tag,
            flags: AtomicU8::new(DescFlags::EMPTY.bits()),
            lazy_core: AtomicU16::new(CoreId::NONE.as_u16()),
            final_next: AtomicU32::new(NO_LINK),
            parking: PlatformParking::new(),
            body: SpinLock::new(DescBody::new()),
        }
    }

    #[inline]
    pub(crate) fn flags(&self) -> DescFlags {
        DescFlags::from_bits(self.flags.load(Ordering::Acquire))
    }

    /// Apply a transition atomically
    pub(crate) fn transition(&self, t: Transition) -> Result<DescFlags, StateError> {
        let mut cur = self.flags.load(Ordering::Acquire);
        loop {
            let next = DescFlags::from_bits(cur).apply(t)?;
            match self.flags.compare_exchange_weak(
                cur,
                next.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Apply a transition that the caller's protocol guarantees is legal
    pub(crate) fn must_transition(&self, t: Transition) -> DescFlags {
        match self.transition(t) {
            Ok(flags) => flags,
            Err(e) => kbug!("{}: {}", self.tag, e),
        }
    }

    /// Core whose completion list currently holds the slot
    #[inline]
    pub(crate) fn listed_on(&self) -> Option<CoreId> {
        CoreId::new(self.lazy_core.load(Ordering::Acquire)).to_option()
    }

    #[inline]
    pub(crate) fn set_listed_on(&self, core: CoreId) {
        self.lazy_core.store(core.as_u16(), Ordering::Release);
    }

    #[inline]
    pub(crate) fn clear_listed(&self) {
        self.lazy_core.store(CoreId::NONE.as_u16(), Ordering::Release);
    }

    /// Reinitialise a freshly claimed slot for `nr_vecs` buffers
    ///
    /// On vector allocation failure the slot stays claimed.
    pub(crate) fn reinit(&self, nr_vecs: usize) -> DescResult<()> {
        let mut body = self.body.lock();
        if !body.vecs.is_empty() {
            kbug!(
                "{} reused while holding {} buffers",
                self.tag,
                body.vecs.len()
            );
        }
        body.shrink_vecs();
        body.max_vecs = nr_vecs;
        body.sector = 0;
        body.chain_next = None;
        body.status = IoStatus::Pending;
        body.end_io = None;
        body.scratch = None;

        if nr_vecs > INLINE_VECS && body.vecs.try_reserve_exact(nr_vecs).is_err() {
            kerror!("{}: cannot allocate {} buffer entries", self.tag, nr_vecs);
            body.max_vecs = 0;
            return Err(DescError::VecAllocFailed {
                tag: self.tag,
                requested: nr_vecs,
            });
        }
        Ok(())
    }

    /// Wake every allocator parked on this slot
    #[inline]
    pub(crate) fn wake_waiters(&self) {
        self.parking.wake_all();
    }
}

/// Why an attach was refused; the page is handed back
pub struct AttachError {
    pub page: PageFrame,
    pub kind: AttachFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachFailure {
    /// The descriptor already holds `max_count` buffers
    Full,
    /// The page had no recorded address and mapping it failed
    MapFailed(i32),
}

impl fmt::Debug for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachError")
            .field("page", &format_args!("{:#x}", self.page.addr()))
            .field("kind", &self.kind)
            .finish()
    }
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AttachFailure::Full => write!(f, "descriptor buffer vector is full"),
            AttachFailure::MapFailed(code) => write!(f, "page mapping failed: {}", code),
        }
    }
}

impl std::error::Error for AttachError {}

/// A claimed descriptor being built by its allocator
///
/// The handle borrows the system; the slot itself stays busy after the
/// handle is gone until it is completed and reclaimed or released through
/// the error path.
pub struct IoDesc<'a> {
    ctx: CoreContext<'a>,
    slot: &'a Slot,
}

impl<'a> IoDesc<'a> {
    pub(crate) fn new(ctx: CoreContext<'a>, slot: &'a Slot) -> Self {
        Self { ctx, slot }
    }

    #[inline]
    pub fn tag(&self) -> SlotTag {
        self.slot.tag
    }

    /// Device command identifier of this descriptor
    #[inline]
    pub fn command_id(&self) -> CommandId {
        self.ctx.system().tags().command_id(self.slot.tag)
    }

    #[inline]
    pub fn flags(&self) -> DescFlags {
        self.slot.flags()
    }

    #[inline]
    pub fn status(&self) -> SlotStatus {
        self.slot.flags().status()
    }

    /// Buffers attached so far
    pub fn vcnt(&self) -> usize {
        self.slot.body.lock().vecs.len()
    }

    pub fn max_vecs(&self) -> usize {
        self.slot.body.lock().max_vecs
    }

    pub fn sector(&self) -> u64 {
        self.slot.body.lock().sector
    }

    pub fn set_sector(&self, sector: u64) {
        self.slot.body.lock().sector = sector;
    }

    /// Mark as an outbound transfer
    pub fn set_write(&self) {
        self.slot.must_transition(Transition::MarkWrite);
    }

    /// Mark as force-unit-access
    pub fn set_fua(&self) {
        self.slot.must_transition(Transition::MarkFua);
    }

    pub fn set_end_io<F>(&self, f: F)
    where
        F: FnOnce(SlotTag, IoStatus) + Send + 'static,
    {
        self.slot.body.lock().end_io = Some(Box::new(f));
    }

    /// Attach data owned by the submission collaborator
    pub fn set_scratch(&self, scratch: Box<dyn Any + Send>) {
        self.slot.body.lock().scratch = Some(scratch);
    }

    /// Link the next descriptor of a submission chain
    pub fn set_next(&self, next: Option<SlotTag>) {
        self.slot.body.lock().chain_next = next;
    }

    /// Attach a page
    ///
    /// A page carrying a recorded device address uses it; any other page is
    /// mapped now. While attached the page carries no recorded address.
    /// An accepted page joins the system's circulation and is recycled into
    /// the pools at reclamation.
    pub fn add_page(&self, page: PageFrame) -> Result<(), AttachError> {
        self.attach(page)?;
        self.ctx.shared().pages_entered(1);
        Ok(())
    }

    fn attach(&self, mut page: PageFrame) -> Result<(), AttachError> {
        let mut body = self.slot.body.lock();
        if body.vecs.len() == body.max_vecs {
            return Err(AttachError {
                page,
                kind: AttachFailure::Full,
            });
        }

        let dma = match page.take_dma() {
            Some(dma) => dma,
            None => {
                let dir = MapDirection::for_write(self.slot.flags().is_write());
                match self.ctx.system().mapper().map(&page, dir) {
                    Ok(dma) => {
                        CoreStats::bump(&self.ctx.stats().pages_introduced);
                        dma
                    }
                    Err(code) => {
                        kerror!(
                            "{}: mapping page {:#x} failed: {}",
                            self.slot.tag,
                            page.addr(),
                            code
                        );
                        return Err(AttachError {
                            page,
                            kind: AttachFailure::MapFailed(code),
                        });
                    }
                }
            }
        };

        body.vecs.push(DescVec {
            page: Some(page),
            dma,
            disposition: Disposition::Pool,
        });
        Ok(())
    }

    /// Attach an outbound page, marking the request as a write
    pub fn add_write_page(&self, page: PageFrame) -> Result<(), AttachError> {
        if !self.slot.flags().is_write() {
            self.set_write();
        }
        self.add_page(page)
    }

    /// Attach up to `count` pages from this core's pool for the request's
    /// direction, indexed consecutively from `first_index`
    ///
    /// Returns the number attached; stops early when the pool runs dry or
    /// the vector is full.
    pub fn fill_from_pool(&self, count: usize, first_index: u64) -> usize {
        let is_write = self.slot.flags().is_write();
        let core = self.ctx.core_state();
        let mut attached = 0;

        while attached < count {
            let Some(mut page) = core.pools.with(|pools| pools.for_write(is_write).take()) else {
                break;
            };

            page.set_index(first_index + attached as u64);
            match self.attach(page) {
                Ok(()) => attached += 1,
                Err(AttachError {
                    mut page,
                    kind: AttachFailure::Full,
                }) => {
                    page.set_index(0);
                    core.pools.with(|pools| pools.for_write(is_write).put(page));
                    break;
                }
                Err(AttachError { page, .. }) => {
                    // A pool page that cannot be mapped is dropped
                    drop(page);
                    self.ctx.shared().pages_left(1);
                    break;
                }
            }
        }
        attached
    }

    /// Device addresses of the attached buffers, in order
    pub fn dma_addrs(&self) -> SmallVec<[DmaAddr; INLINE_VECS]> {
        self.slot.body.lock().vecs.iter().map(|v| v.dma).collect()
    }

    /// Run `f` over the attached buffers
    pub fn with_vecs<R>(&self, f: impl FnOnce(&mut [DescVec]) -> R) -> R {
        f(&mut self.slot.body.lock().vecs[..])
    }

    /// Give up the handle, keeping the descriptor busy
    #[inline]
    pub fn into_tag(self) -> SlotTag {
        self.slot.tag
    }
}

impl fmt::Debug for IoDesc<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoDesc")
            .field("tag", &self.slot.tag)
            .field("flags", &self.slot.flags())
            .finish()
    }
}
