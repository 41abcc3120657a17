//! Tracepoint attachments
//!
//! Binds the dispatcher's programs to the `sys_enter` / `sys_exit` raw
//! tracepoints. States move `Unattached -> Attached -> Detached`; detaching
//! twice is a logged no-op.

use aya::programs::links::Link;
use aya::programs::raw_trace_point::RawTracePointLink;
use log::{debug, info, warn};

use super::module::ModuleInstance;
use crate::domain::{Hook, TraceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Unattached,
    Attached,
    Detached,
}

/// Live binding of a program to a hook
pub trait HookLink {
    /// # Errors
    /// Kernel failure while unbinding.
    fn detach(self) -> Result<(), TraceError>;
}

/// Something that can bind programs to hooks (the dispatcher module)
pub trait HookAttacher {
    type Link: HookLink;

    /// # Errors
    /// `AttachFailed`
    fn attach_hook(&mut self, hook: Hook) -> Result<Self::Link, TraceError>;
}

impl HookLink for RawTracePointLink {
    fn detach(self) -> Result<(), TraceError> {
        Link::detach(self).map_err(|e| TraceError::Io(std::io::Error::other(e)))
    }
}

impl HookAttacher for ModuleInstance {
    type Link = RawTracePointLink;

    fn attach_hook(&mut self, hook: Hook) -> Result<RawTracePointLink, TraceError> {
        let program = self.raw_tracepoint_mut(hook.program())?;
        let link_id = program
            .attach(hook.tracepoint())
            .map_err(|e| TraceError::attach_failed(hook, e))?;
        program.take_link(link_id).map_err(|e| TraceError::attach_failed(hook, e))
    }
}

/// One hook binding
#[derive(Debug)]
pub struct TracepointAttachment<L> {
    hook: Hook,
    link: Option<L>,
    state: AttachState,
}

impl<L: HookLink> TracepointAttachment<L> {
    #[must_use]
    pub fn new(hook: Hook) -> Self {
        Self { hook, link: None, state: AttachState::Unattached }
    }

    /// # Errors
    /// `AttachFailed` if the kernel refuses, or if this attachment was
    /// already used.
    pub fn attach<A>(&mut self, attacher: &mut A) -> Result<(), TraceError>
    where
        A: HookAttacher<Link = L>,
    {
        match self.state {
            AttachState::Unattached => {
                self.link = Some(attacher.attach_hook(self.hook)?);
                self.state = AttachState::Attached;
                info!("Attached {} to {}", self.hook.program(), self.hook);
                Ok(())
            }
            AttachState::Attached => Err(TraceError::attach_failed(self.hook, "already attached")),
            AttachState::Detached => Err(TraceError::attach_failed(self.hook, "already detached")),
        }
    }

    /// Unbind the program. Calling it again is a no-op.
    ///
    /// # Errors
    /// Kernel failure while unbinding. The attachment is `Detached` either way.
    pub fn detach(&mut self) -> Result<(), TraceError> {
        match self.link.take() {
            Some(link) => {
                self.state = AttachState::Detached;
                debug!("Detaching {}", self.hook);
                link.detach()
            }
            None => {
                debug!("{} is not attached ({:?}), nothing to detach", self.hook, self.state);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn hook(&self) -> Hook {
        self.hook
    }

    #[must_use]
    pub fn state(&self) -> AttachState {
        self.state
    }
}

/// Both dispatcher hooks, detached in reverse attach order
#[derive(Debug)]
pub struct Attachments<L: HookLink> {
    // attach order: exit, then enter
    attached: Vec<TracepointAttachment<L>>,
}

impl<L: HookLink> Attachments<L> {
    /// Attach `sys_exit` then `sys_enter`. If the second fails the first is
    /// rolled back.
    ///
    /// # Errors
    /// The first `AttachFailed`.
    pub fn attach<A>(attacher: &mut A) -> Result<Self, TraceError>
    where
        A: HookAttacher<Link = L>,
    {
        let mut this = Self { attached: Vec::with_capacity(Hook::ATTACH_ORDER.len()) };
        for hook in Hook::ATTACH_ORDER {
            let mut attachment = TracepointAttachment::new(hook);
            if let Err(e) = attachment.attach(attacher) {
                if let Err(rollback) = this.detach() {
                    warn!("Rollback after failed attach of {hook}: {rollback}");
                }
                return Err(e);
            }
            this.attached.push(attachment);
        }
        Ok(this)
    }

    /// Detach every hook in reverse order; all are attempted.
    ///
    /// # Errors
    /// The first detach failure.
    pub fn detach(&mut self) -> Result<(), TraceError> {
        let mut first_error = None;
        for attachment in self.attached.iter_mut().rev() {
            if let Err(e) = attachment.detach() {
                warn!("Failed to detach {}: {e}", attachment.hook());
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    #[must_use]
    pub fn states(&self) -> Vec<(Hook, AttachState)> {
        self.attached.iter().map(|a| (a.hook(), a.state())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Journal = Arc<Mutex<Vec<String>>>;

    #[derive(Debug)]
    struct FakeLink {
        hook: Hook,
        journal: Journal,
    }

    impl HookLink for FakeLink {
        fn detach(self) -> Result<(), TraceError> {
            self.journal.lock().unwrap().push(format!("detach {}", self.hook));
            Ok(())
        }
    }

    struct FakeAttacher {
        journal: Journal,
        fail_on: Option<Hook>,
    }

    impl HookAttacher for FakeAttacher {
        type Link = FakeLink;

        fn attach_hook(&mut self, hook: Hook) -> Result<FakeLink, TraceError> {
            if self.fail_on == Some(hook) {
                return Err(TraceError::attach_failed(hook, "EPERM"));
            }
            self.journal.lock().unwrap().push(format!("attach {hook}"));
            Ok(FakeLink { hook, journal: Arc::clone(&self.journal) })
        }
    }

    fn attacher(fail_on: Option<Hook>) -> FakeAttacher {
        FakeAttacher { journal: Journal::default(), fail_on }
    }

    #[test]
    fn test_exit_attached_before_enter() {
        let mut attacher = attacher(None);
        let mut attachments = Attachments::attach(&mut attacher).unwrap();
        attachments.detach().unwrap();

        let journal = attacher.journal.lock().unwrap().clone();
        assert_eq!(journal, ["attach sys_exit", "attach sys_enter", "detach sys_enter", "detach sys_exit"]);
    }

    #[test]
    fn test_failed_enter_rolls_back_exit() {
        let mut attacher = attacher(Some(Hook::SysEnter));
        let err = Attachments::attach(&mut attacher).unwrap_err();

        assert!(matches!(err, TraceError::AttachFailed { hook: Hook::SysEnter, .. }));
        let journal = attacher.journal.lock().unwrap().clone();
        assert_eq!(journal, ["attach sys_exit", "detach sys_exit"]);
    }

    #[test]
    fn test_double_detach_is_noop() {
        let mut attacher = attacher(None);
        let mut attachment = TracepointAttachment::new(Hook::SysExit);
        assert_eq!(attachment.state(), AttachState::Unattached);

        attachment.attach(&mut attacher).unwrap();
        assert_eq!(attachment.state(), AttachState::Attached);

        attachment.detach().unwrap();
        attachment.detach().unwrap();
        assert_eq!(attachment.state(), AttachState::Detached);
        assert_eq!(attacher.journal.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_detached_is_terminal() {
        let mut attacher = attacher(None);
        let mut attachment = TracepointAttachment::new(Hook::SysEnter);
        attachment.attach(&mut attacher).unwrap();
        attachment.detach().unwrap();

        assert!(attachment.attach(&mut attacher).is_err());
        assert_eq!(attachment.state(), AttachState::Detached);
    }

    #[test]
    fn test_states_report_both_hooks() {
        let mut attacher = attacher(None);
        let mut attachments = Attachments::attach(&mut attacher).unwrap();
        assert_eq!(
            attachments.states(),
            vec![(Hook::SysExit, AttachState::Attached), (Hook::SysEnter, AttachState::Attached)]
        );
        attachments.detach().unwrap();
        assert!(attachments.states().iter().all(|(_, s)| *s == AttachState::Detached));
    }
}
