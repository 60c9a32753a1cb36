use crate::authorization::{
    AuthorizationRequest, PermissionType, ResourceType, TenantAuthorizationChecker,
};
use crate::error::EngineError;
use crate::processor::Authorizable;
use crate::state::*;
use crate::types::*;
use crate::writers::Writers;
use anyhow::Result;
use std::collections::BTreeSet;

/// PROCESS_INSTANCE CANCEL. Only root process instances may be cancelled.
pub struct ProcessInstanceCancelProcessor {
    state: SharedState,
    max_root_lookup_depth: usize,
}

impl ProcessInstanceCancelProcessor {
    pub fn new(state: SharedState, max_root_lookup_depth: usize) -> Self {
        Self {
            state,
            max_root_lookup_depth,
        }
    }

    fn not_found(key: Key) -> Rejection {
        Rejection::new(
            RejectionType::NotFound,
            format!("Expected to cancel a process instance with key '{key}', but no such process was found"),
        )
    }

    fn validate(
        &self,
        command: &TypedRecord<ProcessInstanceRecord>,
        instance: &ElementInstance,
    ) -> Result<Checked<()>> {
        let key = command.key;
        if !instance.can_terminate() || instance.parent_key.is_some() {
            return Ok(Err(Self::not_found(key)));
        }

        if !TenantAuthorizationChecker::from_authorizations(&command.authorizations)
            .is_authorized(&instance.value.tenant_id)
        {
            return Ok(Err(Self::not_found(key)));
        }

        if let Some(parent) = instance
            .value
            .parent_process_instance_key
            .filter(|k| *k > 0)
        {
            let root = self.root_process_instance_key(parent)?;
            return Ok(Err(Rejection::new(
                RejectionType::InvalidState,
                format!(
                    "Expected to cancel a process instance with key '{key}', but it is created by a parent process instance. Cancel the root process instance '{root}' instead."
                ),
            )));
        }

        Ok(Ok(()))
    }

    /// Follows parent links upward. A missing instance ends the walk at the
    /// last resolvable key; a cycle or an over-long chain is a defect.
    fn root_process_instance_key(&self, instance_key: Key) -> Result<Key> {
        let mut current = instance_key;
        let mut visited = BTreeSet::new();

        for _ in 0..self.max_root_lookup_depth {
            if !visited.insert(current) {
                break;
            }
            let parent = self
                .state
                .get_instance(current)?
                .and_then(|i| i.value.parent_process_instance_key)
                .filter(|k| *k > 0);
            match parent {
                Some(parent) => current = parent,
                None => return Ok(current),
            }
        }

        Err(EngineError::RootLookupExceeded {
            key: instance_key,
            max_depth: self.max_root_lookup_depth,
        }
        .into())
    }
}

impl Authorizable<ProcessInstanceRecord> for ProcessInstanceCancelProcessor {
    type Resource = ElementInstance;

    fn get_authorization_request(
        &self,
        command: &TypedRecord<ProcessInstanceRecord>,
    ) -> Result<Checked<AuthorizationRequest<ElementInstance>>> {
        let Some(instance) = self.state.get_instance(command.key)? else {
            return Ok(Err(Self::not_found(command.key)));
        };

        let bpmn_process_id = instance.value.bpmn_process_id.clone();
        Ok(Ok(AuthorizationRequest::new(
            ResourceType::ProcessDefinition,
            PermissionType::Update,
        )
        .with_resource(instance)
        .add_resource_id(bpmn_process_id)))
    }

    fn process_record(
        &self,
        command: &TypedRecord<ProcessInstanceRecord>,
        instance: ElementInstance,
        writers: &mut Writers,
    ) -> Result<()> {
        if let Err(rejection) = self.validate(command, &instance)? {
            writers.reject(command, &rejection);
            return Ok(());
        }

        let value = instance.value;
        writers.command().append_follow_up_command(
            command.key,
            ProcessInstanceIntent::TerminateElement,
            value.clone(),
        );
        writers.response().write_event_on_command(
            command.key,
            ProcessInstanceIntent::ElementTerminating,
            value,
            command,
        );
        Ok(())
    }
}
