//! Per-thread runtime state.
//!
//! Every thread that raises or protects owns one [`ThreadContext`], created by
//! [`thread::init`](crate::thread::init) and kept in thread-local storage. The context
//! holds the five bookkeeping stacks:
//!
//! | Stack | Entries | Pushed by |
//! |-------|---------|-----------|
//! | regions | [`RegionMark`] | protected and explicit regions |
//! | dispatch | [`DispatchMark`] | protected regions and running guard bodies |
//! | guards | [`GuardMark`] | the first guard registered in a scope |
//! | frames | [`FrameInfo`](super::FrameInfo) | traced calls and regions |
//! | exceptions | [`ExceptionRecord`](super::ExceptionRecord) | raises |
//!
//! Every region and traced call records the five depths on entry ([`Depths`]) and must
//! bring them back on exit. Any disagreement that cannot be explained by a controlled
//! escape is fatal, since the stacks can no longer be trusted afterwards.
//!
//! The context is only ever borrowed for the duration of a bookkeeping step: user code
//! (bodies, handlers, guard bodies) always runs with the borrow released, so nested use
//! of the runtime from those closures is fine while re-entering the context from inside
//! a bookkeeping step is fatal.

use std::{cell::RefCell, fmt};

use bitflags::bitflags;
use smallvec::SmallVec;
use strum::{Display, EnumCount, EnumIter, IntoEnumIterator};

use crate::{
    config::{RuntimeConfig, StackLimits},
    kind::{self, ErrorKind, KindSlot},
    runtime::{
        fatal::fatal,
        frames::{FrameStack, Site},
        record::{Exception, ExceptionStack},
    },
    utils::FreeStack,
    Error, Result,
};

/// The five per-thread stacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, EnumCount)]
#[strum(serialize_all = "lowercase")]
pub enum StackKind {
    /// Region-exit marks
    Regions,
    /// Catch-dispatch marks
    Dispatch,
    /// Scope-guard marks
    Guards,
    /// Call-site frames
    Frames,
    /// Exception records
    Exceptions,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// A set of stacks, used to report which ones failed reconciliation
    pub struct StackSet: u8 {
        /// Region-exit stack
        const REGIONS = 0x01;
        /// Catch-dispatch stack
        const DISPATCH = 0x02;
        /// Scope-guard stack
        const GUARDS = 0x04;
        /// Frame stack
        const FRAMES = 0x08;
        /// Exception-record stack
        const EXCEPTIONS = 0x10;
    }
}

impl From<StackKind> for StackSet {
    fn from(kind: StackKind) -> Self {
        match kind {
            StackKind::Regions => StackSet::REGIONS,
            StackKind::Dispatch => StackSet::DISPATCH,
            StackKind::Guards => StackSet::GUARDS,
            StackKind::Frames => StackSet::FRAMES,
            StackKind::Exceptions => StackSet::EXCEPTIONS,
        }
    }
}

impl fmt::Display for StackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for kind in StackKind::iter().filter(|kind| self.contains(StackSet::from(*kind))) {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{kind}")?;
            first = false;
        }
        Ok(())
    }
}

/// Depths of the five stacks at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Depths {
    /// Region-exit marks
    pub regions: usize,
    /// Catch-dispatch marks
    pub dispatch: usize,
    /// Scope-guard marks
    pub guards: usize,
    /// Call-site frames
    pub frames: usize,
    /// Exception records
    pub exceptions: usize,
}

impl Depths {
    /// Returns the depth of one stack.
    #[must_use]
    pub fn get(&self, kind: StackKind) -> usize {
        match kind {
            StackKind::Regions => self.regions,
            StackKind::Dispatch => self.dispatch,
            StackKind::Guards => self.guards,
            StackKind::Frames => self.frames,
            StackKind::Exceptions => self.exceptions,
        }
    }

    /// Returns the stacks whose depth differs from `other`.
    #[must_use]
    pub fn mismatches(&self, other: &Depths) -> StackSet {
        StackKind::iter()
            .filter(|kind| self.get(*kind) != other.get(*kind))
            .fold(StackSet::empty(), |set, kind| set | StackSet::from(kind))
    }

    /// Returns the non-empty stacks.
    #[must_use]
    pub fn occupied(&self) -> StackSet {
        self.mismatches(&Depths::default())
    }

    /// Returns `true` if all five stacks are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Depths::default()
    }
}

impl fmt::Display for Depths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "regions={} dispatch={} guards={} frames={} exceptions={}",
            self.regions, self.dispatch, self.guards, self.frames, self.exceptions
        )
    }
}

/// Lifecycle of a region, tracked on its exit mark.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumIter)]
pub enum RegionState {
    /// Not entered, or fully cleaned up
    Outside,
    /// Marks pushed, body not started
    Entered,
    /// Body running with the dispatch mark active
    Dispatching,
    /// Body unwound with an exception; clauses being tested
    Matching,
    /// A clause matched and its handler is running
    Handling,
    /// Releasing records, marks and the frame
    Cleanup,
}

/// Entry on the region-exit stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionMark {
    /// Region id, unique within the thread
    pub id: u64,
    /// Where the region was entered
    pub site: Site,
    /// Current lifecycle state
    pub state: RegionState,
    /// Depths recorded before the region pushed anything
    pub entry: Depths,
    /// `true` for regions opened with [`enter_region!`](crate::enter_region)
    pub explicit: bool,
}

/// What a dispatch mark catches for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum DispatchPurpose {
    /// A protected region matching catch clauses
    Region,
    /// A guard body, where any raise is fatal
    Guard,
}

/// Entry on the catch-dispatch stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchMark {
    /// Id of the region or guard scope owning the mark
    pub owner: u64,
    /// What the mark catches for
    pub purpose: DispatchPurpose,
    /// Record that was in flight when a guard body started, restored when its mark is
    /// popped
    pub saved_in_flight: Option<usize>,
}

/// Entry on the scope-guard stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuardMark {
    /// Guard scope id, unique within the thread
    pub id: u64,
    /// Where the scope was created
    pub site: Site,
}

/// Handle returned on region entry, consumed by its cleanup.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RegionTicket {
    pub id: u64,
    pub site: Site,
    pub entry: Depths,
    pub explicit: bool,
}

/// Explicit region left without being closed, waiting for the protected region that
/// encloses it to report it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PendingEscape {
    pub site: Site,
    pub owner: u64,
}

/// The runtime state of one thread.
#[derive(Debug)]
pub struct ThreadContext {
    regions: FreeStack<RegionMark>,
    dispatch: FreeStack<DispatchMark>,
    guards: FreeStack<GuardMark>,
    frames: FrameStack,
    exceptions: ExceptionStack,
    scratch: String,
    message_limit: usize,
    escape_kind: Option<&'static KindSlot>,
    pending_escapes: SmallVec<[PendingEscape; 2]>,
    in_flight: Option<usize>,
    next_id: u64,
}

impl ThreadContext {
    /// Creates a context with the configured message buffer and the given limits.
    #[must_use]
    pub fn new(config: &RuntimeConfig, limits: StackLimits) -> Self {
        let mut regions = FreeStack::with_limit("regions", limits.regions);
        let mut dispatch = FreeStack::with_limit("dispatch", limits.dispatch);
        let mut guards = FreeStack::with_limit("guards", limits.guards);
        regions.grow((0..config.preallocate).map(|_| RegionMark {
            id: 0,
            site: Site::new("", 0, ""),
            state: RegionState::Outside,
            entry: Depths::default(),
            explicit: false,
        }));
        dispatch.grow((0..config.preallocate).map(|_| DispatchMark {
            owner: 0,
            purpose: DispatchPurpose::Region,
            saved_in_flight: None,
        }));
        guards.grow((0..config.preallocate).map(|_| GuardMark {
            id: 0,
            site: Site::new("", 0, ""),
        }));

        ThreadContext {
            regions,
            dispatch,
            guards,
            frames: FrameStack::new(limits.frames, config.preallocate),
            exceptions: ExceptionStack::new(limits.exceptions, config.preallocate),
            scratch: String::with_capacity(config.message_limit),
            message_limit: config.message_limit,
            escape_kind: config.escape_kind,
            pending_escapes: SmallVec::new(),
            in_flight: None,
            next_id: 1,
        }
    }

    /// Returns the current depth of every stack.
    #[must_use]
    pub fn depths(&self) -> Depths {
        Depths {
            regions: self.regions.depth(),
            dispatch: self.dispatch.depth(),
            guards: self.guards.depth(),
            frames: self.frames.depth(),
            exceptions: self.exceptions.depth(),
        }
    }

    /// Returns the frame stack.
    #[must_use]
    pub fn frames(&self) -> &FrameStack {
        &self.frames
    }

    /// Returns the exception stack.
    #[must_use]
    pub fn exceptions(&self) -> &ExceptionStack {
        &self.exceptions
    }

    /// Returns the innermost open region.
    #[must_use]
    pub fn current_region(&self) -> Option<&RegionMark> {
        self.regions.top()
    }

    /// Returns `true` if a protected region on this thread can catch a raise.
    #[must_use]
    pub fn has_handler(&self) -> bool {
        !self.dispatch.is_empty()
    }

    /// Returns `true` while an explicit region escape waits to be reported.
    #[must_use]
    pub fn has_pending_escape(&self) -> bool {
        !self.pending_escapes.is_empty()
    }

    /// Renders the stack depths, open regions and frames for a fatal report.
    #[must_use]
    pub fn dump(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "stack depths: {}", self.depths());
        for region in self.regions.iter() {
            let _ = writeln!(
                out,
                "region {} ({}) entered at {}: {}",
                region.id,
                if region.explicit { "explicit" } else { "protected" },
                region.site,
                region.state
            );
        }
        for escape in &self.pending_escapes {
            let _ = writeln!(
                out,
                "pending escape from region at {}, owned by region {}",
                escape.site, escape.owner
            );
        }
        self.frames.render_into(self.frames.depth(), &mut out);
        out
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Opens a region: exit mark, dispatch mark for protected regions, then a frame.
    pub(crate) fn enter_region(&mut self, site: Site, explicit: bool) -> Result<RegionTicket> {
        let entry = self.depths();
        let id = self.next_id();
        push_mark(
            &mut self.regions,
            RegionMark {
                id,
                site,
                state: RegionState::Entered,
                entry,
                explicit,
            },
        )?;
        if !explicit {
            push_mark(
                &mut self.dispatch,
                DispatchMark {
                    owner: id,
                    purpose: DispatchPurpose::Region,
                    saved_in_flight: None,
                },
            )?;
        }
        self.frames.push(site)?;
        log::trace!("region {id} at {site}: {} -> {}", RegionState::Outside, RegionState::Entered);

        let ticket = RegionTicket {
            id,
            site,
            entry,
            explicit,
        };
        if !explicit {
            self.set_region_state(&ticket, RegionState::Dispatching)?;
        }
        Ok(ticket)
    }

    /// Moves the region to `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the region is not the innermost one.
    pub(crate) fn set_region_state(
        &mut self,
        ticket: &RegionTicket,
        state: RegionState,
    ) -> Result<()> {
        match self.regions.top_mut() {
            Some(mark) if mark.id == ticket.id => {
                log::trace!("region {} at {}: {} -> {state}", mark.id, mark.site, mark.state);
                mark.state = state;
                Ok(())
            }
            Some(mark) => Err(corrupted_error!(
                "region {} at {} is not innermost, found region {} at {}",
                ticket.id,
                ticket.site,
                mark.id,
                mark.site
            )),
            None => Err(corrupted_error!(
                "region {} at {} is missing from the region stack",
                ticket.id,
                ticket.site
            )),
        }
    }

    /// Takes the record a region's body unwound with and moves the region to Matching.
    pub(crate) fn catch_in_flight(&mut self, ticket: &RegionTicket) -> Result<Exception> {
        self.set_region_state(ticket, RegionState::Matching)?;
        let index = self.in_flight.take().ok_or_else(|| {
            corrupted_error!("region at {} caught an exception with no record", ticket.site)
        })?;
        let record = self.exceptions.get(index).ok_or_else(|| {
            corrupted_error!("in-flight record {} is beyond the exception stack", index)
        })?;
        Ok(record.to_exception(&self.frames))
    }

    /// Pops the region's dispatch mark so its handler raises to the enclosing region.
    pub(crate) fn begin_handling(&mut self, ticket: &RegionTicket) -> Result<()> {
        self.pop_dispatch(ticket.id, DispatchPurpose::Region)?;
        self.set_region_state(ticket, RegionState::Handling)
    }

    /// Pops the dispatch mark owned by `owner`.
    ///
    /// Popping a guard's mark restores the record that was in flight before the guard
    /// body ran.
    pub(crate) fn pop_dispatch(&mut self, owner: u64, purpose: DispatchPurpose) -> Result<()> {
        match self.dispatch.top() {
            Some(mark) if mark.owner == owner && mark.purpose == purpose => {
                let mark = *self.dispatch.pop()?;
                if mark.purpose == DispatchPurpose::Guard {
                    self.in_flight = mark.saved_in_flight;
                }
                Ok(())
            }
            Some(mark) => Err(corrupted_error!(
                "dispatch mark of {} {} expected, found {} {}",
                purpose,
                owner,
                mark.purpose,
                mark.owner
            )),
            None => Err(Error::StackUnderflow { stack: "dispatch" }),
        }
    }

    /// Cleans up a region on any exit path.
    ///
    /// Releases the records raised inside the region, pops its marks and its frame, and
    /// checks that every stack is back at its entry depth. While `unwinding`, a record
    /// still in flight to an outer region survives and moves down to the region's entry
    /// depth.
    ///
    /// An escape this region still owns was superseded by the exception that left the
    /// region; it is logged and dropped.
    pub(crate) fn leave_region(&mut self, ticket: &RegionTicket, unwinding: bool) -> Result<()> {
        self.set_region_state(ticket, RegionState::Cleanup)?;
        if let Some(escape) = self.take_escape(ticket.id) {
            log::warn!(
                "escape from the region entered at {} dropped: the region at {} exited by an exception",
                escape.site,
                ticket.site
            );
        }
        if !ticket.explicit
            && matches!(self.dispatch.top(), Some(mark) if mark.owner == ticket.id)
        {
            self.dispatch.pop()?;
        }

        let entry = ticket.entry;
        self.release_exceptions(entry.exceptions, unwinding)?;
        self.exceptions.detach_above(entry.frames, &self.frames);

        let mark = *self.regions.pop()?;
        self.frames.pop()?;
        log::trace!("region {} at {}: {} -> {}", mark.id, mark.site, mark.state, RegionState::Outside);

        let mut now = self.depths();
        if unwinding && self.in_flight == Some(entry.exceptions) {
            // The surviving record sits exactly at the entry depth
            now.exceptions = now.exceptions.saturating_sub(1);
        }
        let mismatched = now.mismatches(&entry);
        if !mismatched.is_empty() {
            return Err(corrupted_error!(
                "region at {} left unbalanced stacks ({}): entry {}, exit {}",
                ticket.site,
                mismatched,
                entry,
                now
            ));
        }
        Ok(())
    }

    fn release_exceptions(&mut self, depth: usize, keep_in_flight: bool) -> Result<()> {
        match self.in_flight {
            Some(index) if keep_in_flight && index >= depth => {
                self.in_flight = Some(self.exceptions.keep_only(depth, index)?);
            }
            Some(index) if index >= depth => {
                self.in_flight = None;
                self.exceptions.truncate(depth);
            }
            _ => {
                self.exceptions.truncate(depth);
            }
        }
        Ok(())
    }

    /// Reconciles an explicit region that was dropped without being closed.
    ///
    /// Every stack goes back to the region's entry depth and the escape is left pending,
    /// owned by the innermost protected region whose body is still running. Only that
    /// region reports it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if no protected region is active to report it.
    pub(crate) fn escape_region(&mut self, ticket: &RegionTicket) -> Result<()> {
        let entry = ticket.entry;
        let current = self.depths();
        log::warn!(
            "control left the region entered at {} without closing it ({})",
            ticket.site,
            current.mismatches(&entry)
        );

        self.release_exceptions(entry.exceptions, false)?;
        self.exceptions.detach_above(entry.frames, &self.frames);
        self.regions.truncate(entry.regions);
        self.dispatch.truncate(entry.dispatch);
        self.guards.truncate(entry.guards);
        self.frames.reconcile(entry.frames)?;

        let owner = self
            .regions
            .iter()
            .find(|mark| !mark.explicit && mark.state == RegionState::Dispatching)
            .map(|mark| mark.id)
            .ok_or_else(|| {
                corrupted_error!(
                    "illegal escape from the region entered at {} with no protected region to report it",
                    ticket.site
                )
            })?;

        if self.pending_escapes.last().is_some_and(|escape| escape.owner == owner) {
            log::debug!("region {owner} already reports an escape, ignoring {}", ticket.site);
            return Ok(());
        }
        self.pending_escapes.push(PendingEscape {
            site: ticket.site,
            owner,
        });
        Ok(())
    }

    /// Removes the innermost pending escape if `owner` reports it.
    fn take_escape(&mut self, owner: u64) -> Option<PendingEscape> {
        if self.pending_escapes.last()?.owner != owner {
            return None;
        }
        self.pending_escapes.pop()
    }

    /// Claims a pending escape for a region whose body fell through, raising the escape
    /// kind as if the body had raised it.
    ///
    /// # Returns
    ///
    /// The exception to dispatch, or `None` if nothing escaped.
    pub(crate) fn claim_escape(&mut self, ticket: &RegionTicket) -> Result<Option<Exception>> {
        let Some(escape) = self.take_escape(ticket.id) else {
            return Ok(None);
        };
        let kind = self
            .escape_kind
            .and_then(KindSlot::get)
            .unwrap_or(ErrorKind::ILLEGAL_ESCAPE);

        self.scratch.clear();
        let limit = self.message_limit;
        write_bounded(
            &mut self.scratch,
            limit,
            format_args!("control left the region entered at {} without closing it", escape.site),
        );
        self.exceptions.push(kind, &self.scratch, escape.site, &self.frames)?;
        self.in_flight = Some(self.exceptions.depth() - 1);
        log::debug!("region at {} reports an escape from {}", ticket.site, escape.site);

        self.catch_in_flight(ticket).map(Some)
    }

    /// Records a raise.
    ///
    /// Formats the message through the bounded scratch buffer, falling back to the kind's
    /// default message when it comes out empty, and pushes a record anchored at the
    /// current frame.
    ///
    /// # Returns
    ///
    /// `None` if a region will catch the raise, otherwise the exception to report as
    /// uncaught.
    pub(crate) fn raise(
        &mut self,
        kind: ErrorKind,
        site: Site,
        args: fmt::Arguments<'_>,
    ) -> Result<Option<Exception>> {
        kind::registry().entry(kind)?;

        self.scratch.clear();
        let limit = self.message_limit;
        write_bounded(&mut self.scratch, limit, args);
        if self.scratch.is_empty() {
            self.scratch.push_str(kind::registry().default_message(kind));
        }

        self.exceptions.push(kind, &self.scratch, site, &self.frames)?;
        let index = self.exceptions.depth() - 1;
        if self.has_handler() {
            self.in_flight = Some(index);
            return Ok(None);
        }
        let record = self.exceptions.get(index).ok_or(Error::StackUnderflow {
            stack: "exceptions",
        })?;
        Ok(Some(record.to_exception(&self.frames)))
    }

    /// Records a forwarded or rethrown exception, trace included.
    ///
    /// # Returns
    ///
    /// The exception back if no region will catch it.
    pub(crate) fn forward(&mut self, exception: Exception) -> Result<Option<Exception>> {
        if !self.has_handler() {
            return Ok(Some(exception));
        }
        self.exceptions.push_exception(exception)?;
        self.in_flight = Some(self.exceptions.depth() - 1);
        Ok(None)
    }

    /// Pushes the mark for a guard scope.
    pub(crate) fn push_guard_mark(&mut self, site: Site) -> Result<u64> {
        let id = self.next_id();
        push_mark(&mut self.guards, GuardMark { id, site })?;
        Ok(id)
    }

    /// Pops the mark for a guard scope.
    pub(crate) fn pop_guard_mark(&mut self, id: u64) -> Result<()> {
        match self.guards.top() {
            Some(mark) if mark.id == id => {
                self.guards.pop()?;
                Ok(())
            }
            Some(mark) => Err(corrupted_error!(
                "guard scope at {} is not innermost",
                mark.site
            )),
            None => Err(Error::StackUnderflow { stack: "guards" }),
        }
    }

    /// Pushes the dispatch mark a guard body runs under.
    ///
    /// The record in flight to an outer region, if any, is parked on the mark so that
    /// raises caught inside the guard body cannot replace it.
    pub(crate) fn push_guard_dispatch(&mut self, owner: u64) -> Result<()> {
        let saved_in_flight = self.in_flight;
        push_mark(
            &mut self.dispatch,
            DispatchMark {
                owner,
                purpose: DispatchPurpose::Guard,
                saved_in_flight,
            },
        )?;
        self.in_flight = None;
        Ok(())
    }

    /// Pushes the frame of a traced call.
    pub(crate) fn push_frame(&mut self, site: Site) -> Result<Depths> {
        let entry = self.depths();
        self.frames.push(site)?;
        Ok(entry)
    }

    /// Pops the frame of a traced call.
    ///
    /// Frames left behind by the callee are repaired with a warning. On a normal return
    /// the other four stacks must be exactly at their entry depth.
    pub(crate) fn exit_call(&mut self, entry: &Depths, unwinding: bool) -> Result<()> {
        self.exceptions.detach_above(entry.frames, &self.frames);
        self.frames.reconcile(entry.frames + 1)?;
        self.frames.pop()?;
        if unwinding {
            return Ok(());
        }

        let mismatched = self.depths().mismatches(entry);
        if !mismatched.is_empty() {
            return Err(corrupted_error!(
                "traced call returned with unbalanced stacks ({}): entry {}, exit {}",
                mismatched,
                entry,
                self.depths()
            ));
        }
        Ok(())
    }

    /// Sets the annotation of the innermost frame.
    pub(crate) fn annotate(&mut self, text: &str) -> bool {
        self.frames.annotate(text)
    }
}

/// Pushes a copyable mark, reusing a recycled node when one is available.
fn push_mark<T: Copy>(stack: &mut FreeStack<T>, mark: T) -> Result<()> {
    *stack.alloc_with(|| mark)? = mark;
    Ok(())
}

/// Writes `args` into `out`, stopping at `limit` bytes on a character boundary.
pub(crate) fn write_bounded(out: &mut String, limit: usize, args: fmt::Arguments<'_>) {
    struct Bounded<'a> {
        out: &'a mut String,
        limit: usize,
    }

    impl fmt::Write for Bounded<'_> {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let room = self.limit.saturating_sub(self.out.len());
            if s.len() <= room {
                self.out.push_str(s);
                return Ok(());
            }
            let mut end = room;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            self.out.push_str(&s[..end]);
            Err(fmt::Error)
        }
    }

    // Err only signals truncation
    let _ = fmt::Write::write_fmt(&mut Bounded { out, limit }, args);
}

thread_local! {
    static CONTEXT: RefCell<Option<ThreadContext>> = const { RefCell::new(None) };
}

/// Runs a bookkeeping step against the thread's context.
///
/// Any error is fatal: it is reported together with a dump of the context, and the
/// terminator is invoked after the context borrow has been released.
pub(crate) fn with_context<R, F>(f: F) -> R
where
    F: FnOnce(&mut ThreadContext) -> Result<R>,
{
    let outcome = CONTEXT.try_with(|cell| match cell.try_borrow_mut() {
        Ok(mut slot) => match slot.as_mut() {
            Some(context) => f(context).map_err(|error| (error, Some(context.dump()))),
            None => Err((Error::ContextMissing, None)),
        },
        Err(_) => Err((corrupted_error!("thread context re-entered"), None)),
    });

    match outcome {
        Ok(Ok(value)) => value,
        Ok(Err((error, dump))) => fatal(&error, dump),
        Err(_) => fatal(&Error::ContextMissing, None),
    }
}

/// Runs `f` against the thread's context, returning errors instead of terminating.
pub(crate) fn try_with_context<R, F>(f: F) -> Result<R>
where
    F: FnOnce(&mut ThreadContext) -> Result<R>,
{
    CONTEXT
        .try_with(|cell| {
            let mut slot = cell
                .try_borrow_mut()
                .map_err(|_| corrupted_error!("thread context re-entered"))?;
            slot.as_mut().map_or(Err(Error::ContextMissing), f)
        })
        .map_err(|_| Error::ContextMissing)?
}

/// Installs a fresh context on this thread.
pub(crate) fn install(context: ThreadContext) -> Result<()> {
    CONTEXT
        .try_with(|cell| {
            let mut slot = cell.try_borrow_mut().map_err(|_| Error::ContextActive)?;
            if slot.is_some() {
                return Err(Error::ContextActive);
            }
            *slot = Some(context);
            Ok(())
        })
        .map_err(|_| Error::ContextMissing)?
}

/// Removes this thread's context.
pub(crate) fn uninstall() -> Option<ThreadContext> {
    CONTEXT
        .try_with(|cell| cell.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
        .ok()
        .flatten()
}

/// Returns `true` if this thread has a context.
pub(crate) fn is_installed() -> bool {
    CONTEXT
        .try_with(|cell| cell.try_borrow().map(|slot| slot.is_some()).unwrap_or(true))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ThreadContext {
        ThreadContext::new(&RuntimeConfig::default(), StackLimits::uniform(16))
    }

    fn site(line: u32) -> Site {
        Site::new("src/sample.rs", line, "sample")
    }

    #[test]
    fn test_depth_mismatches() {
        let entry = Depths::default();
        let exit = Depths {
            frames: 2,
            guards: 1,
            ..Depths::default()
        };
        let mismatched = exit.mismatches(&entry);
        assert_eq!(mismatched, StackSet::GUARDS | StackSet::FRAMES);
        assert_eq!(mismatched.to_string(), "guards, frames");
        assert!(entry.is_empty());
        assert_eq!(exit.occupied(), mismatched);
    }

    #[test]
    fn test_region_enter_leave_balanced() -> Result<()> {
        let mut ctx = context();
        let outer = ctx.enter_region(site(1), false)?;
        let inner = ctx.enter_region(site(2), true)?;
        assert_eq!(
            ctx.depths(),
            Depths {
                regions: 2,
                dispatch: 1,
                guards: 0,
                frames: 2,
                exceptions: 0,
            }
        );
        assert_eq!(ctx.current_region().map(|r| r.state), Some(RegionState::Entered));

        ctx.leave_region(&inner, false)?;
        assert_eq!(ctx.current_region().map(|r| r.state), Some(RegionState::Dispatching));
        ctx.leave_region(&outer, false)?;
        assert!(ctx.depths().is_empty());
        Ok(())
    }

    #[test]
    fn test_leave_out_of_order_is_corruption() -> Result<()> {
        let mut ctx = context();
        let outer = ctx.enter_region(site(1), false)?;
        let _inner = ctx.enter_region(site(2), false)?;
        assert!(matches!(
            ctx.leave_region(&outer, false),
            Err(Error::Corrupted { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_raise_and_catch() -> Result<()> {
        let mut ctx = context();
        let region = ctx.enter_region(site(1), false)?;
        let uncaught = ctx.raise(ErrorKind::STACK_CORRUPTED, site(5), format_args!("{}!", "boom"))?;
        assert!(uncaught.is_none());

        let caught = ctx.catch_in_flight(&region)?;
        assert_eq!(caught.kind(), ErrorKind::STACK_CORRUPTED);
        assert_eq!(caught.message(), "boom!");
        assert_eq!(caught.frames().len(), 1);

        ctx.begin_handling(&region)?;
        assert_eq!(ctx.depths().dispatch, 0);
        ctx.leave_region(&region, false)?;
        assert!(ctx.depths().is_empty());
        Ok(())
    }

    #[test]
    fn test_raise_without_region_is_uncaught() -> Result<()> {
        let mut ctx = context();
        let uncaught = ctx.raise(ErrorKind::ILLEGAL_ESCAPE, site(3), format_args!(""))?;
        let exception = uncaught.expect("no region to catch");
        assert_eq!(
            exception.message(),
            kind::registry().default_message(ErrorKind::ILLEGAL_ESCAPE)
        );
        Ok(())
    }

    #[test]
    fn test_unwinding_keeps_in_flight_record() -> Result<()> {
        let mut ctx = context();
        let outer = ctx.enter_region(site(1), false)?;
        let inner = ctx.enter_region(site(2), false)?;

        // Inner region catches one exception, its handler raises another
        ctx.raise(ErrorKind::STACK_EXHAUSTED, site(3), format_args!("handled"))?;
        ctx.catch_in_flight(&inner)?;
        ctx.begin_handling(&inner)?;
        ctx.raise(ErrorKind::STACK_CORRUPTED, site(4), format_args!("escaping"))?;
        assert_eq!(ctx.depths().exceptions, 2);

        ctx.leave_region(&inner, true)?;
        assert_eq!(ctx.depths().exceptions, 1);
        assert_eq!(
            ctx.exceptions().top().map(|r| r.message().to_string()),
            Some("escaping".to_string())
        );

        let caught = ctx.catch_in_flight(&outer)?;
        assert_eq!(caught.kind(), ErrorKind::STACK_CORRUPTED);
        ctx.begin_handling(&outer)?;
        ctx.leave_region(&outer, false)?;
        assert!(ctx.depths().is_empty());
        Ok(())
    }

    #[test]
    fn test_escape_is_reported_by_enclosing_region() -> Result<()> {
        let mut ctx = context();
        let region = ctx.enter_region(site(1), false)?;
        let explicit = ctx.enter_region(site(2), true)?;
        ctx.push_frame(site(3))?;

        ctx.escape_region(&explicit)?;
        assert!(ctx.has_pending_escape());
        assert_eq!(ctx.depths().regions, 1);
        assert_eq!(ctx.depths().frames, 1);

        let reported = ctx.claim_escape(&region)?.expect("pending escape");
        assert_eq!(reported.kind(), ErrorKind::ILLEGAL_ESCAPE);
        assert!(reported.message().contains("src/sample.rs"));
        assert!(!ctx.has_pending_escape());

        ctx.begin_handling(&region)?;
        ctx.leave_region(&region, false)?;
        assert!(ctx.depths().is_empty());
        Ok(())
    }

    #[test]
    fn test_escape_without_region_is_corruption() -> Result<()> {
        let mut ctx = context();
        let explicit = ctx.enter_region(site(1), true)?;
        assert!(matches!(
            ctx.escape_region(&explicit),
            Err(Error::Corrupted { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_guard_dispatch_parks_in_flight_record() -> Result<()> {
        let mut ctx = context();
        let outer = ctx.enter_region(site(1), false)?;
        ctx.raise(ErrorKind::STACK_EXHAUSTED, site(2), format_args!("unwinding"))?;

        // A guard body runs while the raise unwinds and catches its own exception
        let guard = ctx.push_guard_mark(site(3))?;
        ctx.push_guard_dispatch(guard)?;
        let inner = ctx.enter_region(site(4), false)?;
        ctx.raise(ErrorKind::STACK_CORRUPTED, site(5), format_args!("inside guard"))?;
        assert_eq!(ctx.catch_in_flight(&inner)?.message(), "inside guard");
        ctx.begin_handling(&inner)?;
        ctx.leave_region(&inner, false)?;
        ctx.pop_dispatch(guard, DispatchPurpose::Guard)?;
        ctx.pop_guard_mark(guard)?;

        let caught = ctx.catch_in_flight(&outer)?;
        assert_eq!(caught.message(), "unwinding");
        ctx.begin_handling(&outer)?;
        ctx.leave_region(&outer, false)?;
        assert!(ctx.depths().is_empty());
        Ok(())
    }

    #[test]
    fn test_escape_belongs_to_enclosing_region() -> Result<()> {
        let mut ctx = context();
        let owner = ctx.enter_region(site(1), false)?;
        let explicit = ctx.enter_region(site(2), true)?;
        ctx.escape_region(&explicit)?;

        // A region entered after the escape does not report it
        let later = ctx.enter_region(site(3), false)?;
        assert!(ctx.claim_escape(&later)?.is_none());
        ctx.leave_region(&later, false)?;
        assert!(ctx.has_pending_escape());

        // The owner leaves by an exception; the escape goes with it
        ctx.raise(ErrorKind::STACK_CORRUPTED, site(4), format_args!("boom"))?;
        ctx.catch_in_flight(&owner)?;
        ctx.begin_handling(&owner)?;
        ctx.leave_region(&owner, false)?;
        assert!(!ctx.has_pending_escape());
        assert!(ctx.depths().is_empty());
        Ok(())
    }

    #[test]
    fn test_exit_call_repairs_frames() -> Result<()> {
        let mut ctx = context();
        let entry = ctx.push_frame(site(1))?;
        ctx.frames.push(site(2))?;
        ctx.exit_call(&entry, false)?;
        assert_eq!(ctx.depths(), entry);

        let entry = ctx.push_frame(site(3))?;
        ctx.push_guard_mark(site(4))?;
        assert!(matches!(
            ctx.exit_call(&entry, false),
            Err(Error::Corrupted { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_write_bounded() {
        let mut out = String::new();
        write_bounded(&mut out, 5, format_args!("{}", "abcdefgh"));
        assert_eq!(out, "abcde");

        out.clear();
        write_bounded(&mut out, 2, format_args!("é{}", 1));
        assert_eq!(out, "é");
    }

    #[test]
    fn test_capacity_is_enforced() -> Result<()> {
        let mut ctx = ThreadContext::new(&RuntimeConfig::default(), StackLimits::uniform(2));
        ctx.enter_region(site(1), false)?;
        ctx.enter_region(site(2), false)?;
        assert!(matches!(
            ctx.enter_region(site(3), false),
            Err(Error::CapacityExceeded { .. })
        ));
        Ok(())
    }
}
