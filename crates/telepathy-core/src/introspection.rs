use std::collections::VecDeque;

/// One unit of core-feature introspection work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrospectStep {
    /// Batched `GetAll(Channel)`, or the immutable properties handed to the proxy.
    MainProperties,
    FallbackChannelType,
    FallbackHandle,
    FallbackInterfaces,
    /// Batched `GetAll(Channel.Interface.Group)`.
    Group,
    GroupFallbackFlags,
    GroupFallbackMembers,
    GroupFallbackLocalPendingWithInfo,
    /// Last group fallback; its completion seeds the initial membership.
    GroupFallbackSelfHandle,
    Conference,
}

impl IntrospectStep {
    /// Legacy calls replacing a batched `GetAll(Channel)` that lacked mandatory keys.
    pub const MAIN_FALLBACK: [IntrospectStep; 3] = [
        IntrospectStep::FallbackChannelType,
        IntrospectStep::FallbackHandle,
        IntrospectStep::FallbackInterfaces,
    ];

    /// Legacy calls replacing a batched `GetAll(Group)` that lacked mandatory keys.
    pub const GROUP_FALLBACK: [IntrospectStep; 4] = [
        IntrospectStep::GroupFallbackFlags,
        IntrospectStep::GroupFallbackMembers,
        IntrospectStep::GroupFallbackLocalPendingWithInfo,
        IntrospectStep::GroupFallbackSelfHandle,
    ];

    /// Whether a failed call for this step invalidates the channel.
    pub fn is_mandatory(self) -> bool {
        matches!(
            self,
            Self::FallbackChannelType | Self::FallbackHandle | Self::FallbackInterfaces
        )
    }
}

/// FIFO of introspection steps, drained one at a time.
#[derive(Debug, Clone, Default)]
pub struct IntrospectionQueue {
    steps: VecDeque<IntrospectStep>,
}

impl IntrospectionQueue {
    pub fn enqueue(&mut self, step: IntrospectStep) {
        self.steps.push_back(step);
    }

    pub fn enqueue_all<I>(&mut self, steps: I)
    where
        I: IntoIterator<Item = IntrospectStep>,
    {
        self.steps.extend(steps);
    }

    pub fn dequeue(&mut self) -> Option<IntrospectStep> {
        self.steps.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &IntrospectStep> {
        self.steps.iter()
    }
}
