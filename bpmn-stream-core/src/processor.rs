//! Processor traits, the authorization wrapper, and the intent registry.

use crate::authorization::{AuthorizationCheckBehavior, AuthorizationRequest};
use crate::error::{EngineError, ProcessingError};
use crate::types::*;
use crate::writers::Writers;
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Handles one kind of command.
pub trait TypedRecordProcessor<V: RecordValue>: Send + Sync {
    fn process_record(&self, command: &TypedRecord<V>, writers: &mut Writers) -> Result<()>;

    /// Classifies an error returned by `process_record`.
    fn try_handle_error(&self, _command: &TypedRecord<V>, _error: &anyhow::Error) -> ProcessingError {
        ProcessingError::Unexpected
    }
}

impl<V: RecordValue, P: TypedRecordProcessor<V>> TypedRecordProcessor<V> for Arc<P> {
    fn process_record(&self, command: &TypedRecord<V>, writers: &mut Writers) -> Result<()> {
        (**self).process_record(command, writers)
    }

    fn try_handle_error(&self, command: &TypedRecord<V>, error: &anyhow::Error) -> ProcessingError {
        (**self).try_handle_error(command, error)
    }
}

/// A domain processor that needs a permission check before it runs.
pub trait Authorizable<V: RecordValue>: Send + Sync {
    /// Whatever the request resolves to (element instance, user task, ...).
    type Resource;

    /// Derives the request without mutating state. A rejection here is
    /// written as-is, e.g. NOT_FOUND when the target does not exist.
    fn get_authorization_request(
        &self,
        command: &TypedRecord<V>,
    ) -> Result<Checked<AuthorizationRequest<Self::Resource>>>;

    fn process_record(
        &self,
        command: &TypedRecord<V>,
        resource: Self::Resource,
        writers: &mut Writers,
    ) -> Result<()>;

    fn try_handle_error(&self, _command: &TypedRecord<V>, _error: &anyhow::Error) -> ProcessingError {
        ProcessingError::Unexpected
    }
}

/// Runs the authorization check, then the delegate. An unauthorized command
/// is rejected and the delegate never sees it.
pub struct AuthorizableProcessor<V: RecordValue, A: Authorizable<V>> {
    behavior: AuthorizationCheckBehavior,
    delegate: Arc<A>,
    _value: PhantomData<fn() -> V>,
}

impl<V: RecordValue, A: Authorizable<V>> AuthorizableProcessor<V, A> {
    pub fn new(behavior: AuthorizationCheckBehavior, delegate: Arc<A>) -> Self {
        Self {
            behavior,
            delegate,
            _value: PhantomData,
        }
    }
}

impl<V: RecordValue, A: Authorizable<V>> TypedRecordProcessor<V> for AuthorizableProcessor<V, A> {
    fn process_record(&self, command: &TypedRecord<V>, writers: &mut Writers) -> Result<()> {
        let request = match self.delegate.get_authorization_request(command)? {
            Ok(request) => request,
            Err(rejection) => {
                writers.reject(command, &rejection);
                return Ok(());
            }
        };

        if !self.behavior.is_authorized(command, &request)? {
            let rejection = Rejection::new(
                RejectionType::Unauthorized,
                request.unauthorized_message(),
            );
            tracing::debug!(key = command.key, intent = %command.intent, reason = %rejection.reason, "command unauthorized");
            writers.reject(command, &rejection);
            return Ok(());
        }

        let resource = request
            .into_resource()
            .ok_or(EngineError::MissingResource(V::wrap_intent(command.intent)))?;
        self.delegate.process_record(command, resource, writers)
    }

    fn try_handle_error(&self, command: &TypedRecord<V>, error: &anyhow::Error) -> ProcessingError {
        self.delegate.try_handle_error(command, error)
    }
}

// ── Untyped dispatch ──

/// Object-safe processor over raw records, as stored in the registry.
pub trait RecordProcessor: Send + Sync {
    fn process(&self, command: &Record, writers: &mut Writers) -> Result<()>;
    fn try_handle_error(&self, command: &Record, error: &anyhow::Error) -> ProcessingError;
}

struct TypedAdapter<V, P> {
    inner: P,
    _value: PhantomData<fn() -> V>,
}

impl<V: RecordValue, P: TypedRecordProcessor<V>> TypedAdapter<V, P> {
    fn typed(&self, command: &Record) -> Result<TypedRecord<V>> {
        TypedRecord::from_record(command).ok_or_else(|| {
            anyhow!(
                "Expected a {:?} record, but got intent '{}'",
                V::VALUE_TYPE,
                command.intent
            )
        })
    }
}

impl<V: RecordValue, P: TypedRecordProcessor<V>> RecordProcessor for TypedAdapter<V, P> {
    fn process(&self, command: &Record, writers: &mut Writers) -> Result<()> {
        let typed = self.typed(command)?;
        self.inner.process_record(&typed, writers)
    }

    fn try_handle_error(&self, command: &Record, error: &anyhow::Error) -> ProcessingError {
        match self.typed(command) {
            Ok(typed) => self.inner.try_handle_error(&typed, error),
            Err(_) => ProcessingError::Unexpected,
        }
    }
}

/// Intent → processor table, built once per engine.
#[derive(Default)]
pub struct RecordProcessors {
    processors: BTreeMap<Intent, Arc<dyn RecordProcessor>>,
}

impl RecordProcessors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one processor for every intent in `intents`.
    pub fn register<V, P>(&mut self, intents: &[V::Intent], processor: P) -> &mut Self
    where
        V: RecordValue,
        P: TypedRecordProcessor<V> + 'static,
    {
        let shared: Arc<dyn RecordProcessor> = Arc::new(TypedAdapter {
            inner: processor,
            _value: PhantomData::<fn() -> V>,
        });
        for intent in intents {
            self.processors.insert(V::wrap_intent(*intent), shared.clone());
        }
        self
    }

    pub fn get(&self, intent: &Intent) -> Result<&Arc<dyn RecordProcessor>> {
        self.processors
            .get(intent)
            .ok_or_else(|| EngineError::NoRecordProcessor(*intent).into())
    }

    pub fn handles(&self, intent: &Intent) -> bool {
        self.processors.contains_key(intent)
    }

    pub fn intents(&self) -> impl Iterator<Item = &Intent> {
        self.processors.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appliers::EventAppliers;
    use crate::authorization::{PermissionType, ResourceType};
    use crate::config::EngineConfig;
    use crate::state::{BannedInstanceState, MemoryState, MutableBannedInstanceState};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Bans the instance it is asked about; must never run when unauthorized.
    struct Mutating {
        state: Arc<MemoryState>,
        calls: AtomicUsize,
    }

    impl Authorizable<TimerRecord> for Mutating {
        type Resource = Key;

        fn get_authorization_request(
            &self,
            command: &TypedRecord<TimerRecord>,
        ) -> Result<Checked<AuthorizationRequest<Key>>> {
            if command.key == 0 {
                return Ok(Err(Rejection::new(RejectionType::NotFound, "no such timer")));
            }
            Ok(Ok(AuthorizationRequest::new(
                ResourceType::ProcessDefinition,
                PermissionType::Update,
            )
            .with_resource(command.value.process_instance_key)
            .add_resource_id("proc")))
        }

        fn process_record(
            &self,
            _command: &TypedRecord<TimerRecord>,
            resource: Key,
            _writers: &mut Writers,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.state.ban_instance(resource)
        }
    }

    fn setup(config: &EngineConfig) -> (Arc<MemoryState>, Arc<Mutating>, RecordProcessors, Writers) {
        let state = Arc::new(MemoryState::default());
        let delegate = Arc::new(Mutating {
            state: state.clone(),
            calls: AtomicUsize::new(0),
        });
        let mut processors = RecordProcessors::new();
        processors.register::<TimerRecord, _>(
            &[TimerIntent::Trigger],
            AuthorizableProcessor::new(
                AuthorizationCheckBehavior::new(state.clone(), config),
                delegate.clone(),
            ),
        );
        let writers = Writers::new(Arc::new(EventAppliers::new(state.clone())));
        (state, delegate, processors, writers)
    }

    fn trigger(key: Key) -> Record {
        Record::command(
            key,
            TimerIntent::Trigger,
            TimerRecord {
                process_instance_key: 77,
                ..Default::default()
            },
        )
        .with_request(1, 1)
    }

    #[test]
    fn unauthorized_command_never_reaches_delegate() {
        let config = EngineConfig {
            enable_authorization: true,
            ..Default::default()
        };
        let (state, delegate, processors, mut writers) = setup(&config);
        let before = state.fingerprint().unwrap();

        let command = trigger(5);
        processors
            .get(&command.intent)
            .unwrap()
            .process(&command, &mut writers)
            .unwrap();

        let result = writers.take_result();
        let rejection = result.rejection().unwrap();
        assert_eq!(rejection.rejection_type, RejectionType::Unauthorized);
        assert_eq!(
            rejection.reason,
            "Unauthorized to perform operation 'UPDATE' on resource 'PROCESS_DEFINITION'"
        );
        assert!(result.response.is_some());
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.fingerprint().unwrap(), before);
    }

    #[test]
    fn authorized_command_runs_delegate_with_resource() {
        let (state, delegate, processors, mut writers) = setup(&EngineConfig::default());
        let command = trigger(5);
        processors
            .get(&command.intent)
            .unwrap()
            .process(&command, &mut writers)
            .unwrap();

        assert_eq!(delegate.calls.load(Ordering::SeqCst), 1);
        assert!(state.is_banned_instance(77).unwrap());
    }

    #[test]
    fn request_rejection_is_written_without_processing() {
        let (_, delegate, processors, mut writers) = setup(&EngineConfig::default());
        let command = trigger(0);
        processors
            .get(&command.intent)
            .unwrap()
            .process(&command, &mut writers)
            .unwrap();

        let result = writers.take_result();
        assert_eq!(
            result.rejection().unwrap().rejection_type,
            RejectionType::NotFound
        );
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_intent_is_an_engine_error() {
        let (_, _, processors, _) = setup(&EngineConfig::default());
        let err = processors
            .get(&Intent::Job(JobIntent::Complete))
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::NoRecordProcessor(_))
        ));
    }
}
