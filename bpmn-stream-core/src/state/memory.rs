use super::*;
use anyhow::anyhow;
use sha2::{Digest, Sha256};
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct UserTaskEntry {
    record: UserTaskRecord,
    lifecycle_state: Option<LifecycleState>,
    intermediate: Option<UserTaskRecord>,
    request_metadata: Option<RequestMetadata>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StateData {
    partition_id: i32,
    key_counter: i64,
    element_instances: BTreeMap<Key, ElementInstance>,
    user_tasks: BTreeMap<Key, UserTaskEntry>,
    timers: BTreeMap<Key, TimerInstance>,
    /// Derived from `timers`; rebuilt on load, never serialized.
    #[serde(skip)]
    timer_due_index: BTreeSet<(Timestamp, Key)>,
    grants: BTreeMap<Key, Grants>,
    users: BTreeMap<Key, PersistedUser>,
    banned: BTreeSet<Key>,
    processes: BTreeMap<Key, DeployedProcess>,
    variables: BTreeMap<Key, Variables>,
    jobs: BTreeMap<Key, JobRecord>,
    incidents: BTreeMap<Key, IncidentRecord>,
}

impl StateData {
    fn user_task_mut(&mut self, key: Key) -> Result<&mut UserTaskEntry> {
        self.user_tasks
            .get_mut(&key)
            .ok_or_else(|| anyhow!("User task not found: {}", key))
    }

    fn element_instance_mut(&mut self, key: Key) -> Result<&mut ElementInstance> {
        self.element_instances
            .get_mut(&key)
            .ok_or_else(|| anyhow!("Element instance not found: {}", key))
    }
}

/// In-memory processing state for tests and the replay harness.
///
/// One `RwLock` guards the whole state. `begin` snapshots it, `rollback`
/// restores the snapshot, so a failed command leaves no trace.
///
/// Only the stream processor opens transactions. The due-date checker's
/// removal of a banned instance's timer is a direct write outside them: a
/// rollback that overlaps it brings the timer back, and the next scan drops
/// it again. The removal is never logged, so replay keeps such timers until
/// the first scan after recovery.
pub struct MemoryState {
    inner: RwLock<StateData>,
    backup: RwLock<Option<StateData>>,
}

impl MemoryState {
    pub fn new(partition_id: i32) -> Self {
        Self {
            inner: RwLock::new(StateData {
                partition_id,
                ..Default::default()
            }),
            backup: RwLock::new(None),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StateData>> {
        self.inner.read().map_err(|e| anyhow!("Lock: {}", e))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StateData>> {
        self.inner.write().map_err(|e| anyhow!("Lock: {}", e))
    }

    /// SHA-256 over the canonical JSON form of the state.
    pub fn fingerprint(&self) -> Result<[u8; 32]> {
        let data = self.read()?;
        let bytes = serde_json::to_vec(&*data)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hasher.finalize().into())
    }

    /// Canonical JSON snapshot (same bytes the fingerprint hashes).
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let data = self.read()?;
        Ok(serde_json::to_value(&*data)?)
    }

    pub fn timer_count(&self) -> Result<usize> {
        Ok(self.read()?.timers.len())
    }

    pub fn banned_instances(&self) -> Result<Vec<Key>> {
        Ok(self.read()?.banned.iter().copied().collect())
    }
}

impl Default for MemoryState {
    fn default() -> Self {
        Self::new(1)
    }
}

// ── Read contracts ──

impl ElementInstanceState for MemoryState {
    fn get_instance(&self, key: Key) -> Result<Option<ElementInstance>> {
        Ok(self.read()?.element_instances.get(&key).cloned())
    }
}

impl UserTaskState for MemoryState {
    fn get_lifecycle_state(&self, key: Key) -> Result<Option<LifecycleState>> {
        Ok(self
            .read()?
            .user_tasks
            .get(&key)
            .and_then(|t| t.lifecycle_state))
    }

    fn get_user_task(&self, key: Key) -> Result<Option<UserTaskRecord>> {
        Ok(self.read()?.user_tasks.get(&key).map(|t| t.record.clone()))
    }

    fn get_intermediate_state(&self, key: Key) -> Result<Option<UserTaskRecord>> {
        Ok(self
            .read()?
            .user_tasks
            .get(&key)
            .and_then(|t| t.intermediate.clone()))
    }

    fn find_request_metadata(&self, key: Key) -> Result<Option<RequestMetadata>> {
        Ok(self
            .read()?
            .user_tasks
            .get(&key)
            .and_then(|t| t.request_metadata.clone()))
    }
}

impl TimerInstanceState for MemoryState {
    fn get_timer(&self, key: Key) -> Result<Option<TimerInstance>> {
        Ok(self.read()?.timers.get(&key).cloned())
    }

    fn process_timers_due_after(
        &self,
        after: Option<(Timestamp, Key)>,
        timestamp: Timestamp,
        visitor: &mut dyn TimerVisitor,
    ) -> Result<Option<Timestamp>> {
        let mut cursor = after;
        loop {
            // The visitor may remove timers, so the lock is released before visiting.
            let next = {
                let data = self.read()?;
                let lower = match cursor {
                    Some(c) => Bound::Excluded(c),
                    None => Bound::Unbounded,
                };
                data.timer_due_index
                    .range((lower, Bound::Unbounded))
                    .next()
                    .copied()
                    .map(|entry| (entry, data.timers.get(&entry.1).cloned()))
            };

            let Some(((due_date, key), timer)) = next else {
                return Ok(None);
            };
            if due_date > timestamp {
                return Ok(Some(due_date));
            }
            cursor = Some((due_date, key));

            let Some(timer) = timer else { continue };
            if !visitor.visit(&timer)? {
                return Ok(Some(due_date));
            }
        }
    }

    fn next_due_date(&self) -> Result<Option<Timestamp>> {
        Ok(self.read()?.timer_due_index.iter().next().map(|(d, _)| *d))
    }
}

impl AuthorizationState for MemoryState {
    fn get_resource_identifiers(
        &self,
        owner_key: Key,
        resource_type: ResourceType,
        permission_type: PermissionType,
    ) -> Result<BTreeSet<String>> {
        Ok(self
            .read()?
            .grants
            .get(&owner_key)
            .and_then(|g| g.get(&resource_type))
            .and_then(|p| p.get(&permission_type))
            .cloned()
            .unwrap_or_default())
    }
}

impl UserState for MemoryState {
    fn get_user(&self, key: Key) -> Result<Option<PersistedUser>> {
        Ok(self.read()?.users.get(&key).cloned())
    }
}

impl BannedInstanceState for MemoryState {
    fn is_banned_instance(&self, process_instance_key: Key) -> Result<bool> {
        Ok(self.read()?.banned.contains(&process_instance_key))
    }
}

impl ProcessState for MemoryState {
    fn get_process(&self, process_definition_key: Key) -> Result<Option<DeployedProcess>> {
        Ok(self.read()?.processes.get(&process_definition_key).cloned())
    }
}

impl VariableState for MemoryState {
    fn get_variable(&self, scope_key: Key, name: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .read()?
            .variables
            .get(&scope_key)
            .and_then(|vars| vars.get(name))
            .cloned())
    }
}

impl JobState for MemoryState {
    fn get_job(&self, key: Key) -> Result<Option<JobRecord>> {
        Ok(self.read()?.jobs.get(&key).cloned())
    }
}

impl IncidentState for MemoryState {
    fn get_incident(&self, key: Key) -> Result<Option<IncidentRecord>> {
        Ok(self.read()?.incidents.get(&key).cloned())
    }

    fn incidents_for_element(&self, element_instance_key: Key) -> Result<Vec<Key>> {
        Ok(self
            .read()?
            .incidents
            .iter()
            .filter(|(_, i)| i.element_instance_key == element_instance_key)
            .map(|(k, _)| *k)
            .collect())
    }
}

// ── Write contracts ──

impl MutableElementInstanceState for MemoryState {
    fn put_instance(&self, instance: ElementInstance) -> Result<()> {
        self.write()?.element_instances.insert(instance.key, instance);
        Ok(())
    }

    fn update_instance_state(&self, key: Key, state: ProcessInstanceIntent) -> Result<()> {
        self.write()?.element_instance_mut(key)?.state = state;
        Ok(())
    }

    fn remove_instance(&self, key: Key) -> Result<()> {
        let mut data = self.write()?;
        data.element_instances.remove(&key);
        data.variables.remove(&key);
        Ok(())
    }

    fn increment_task_listener_index(
        &self,
        key: Key,
        event_type: TaskListenerEventType,
    ) -> Result<()> {
        let mut data = self.write()?;
        let instance = data.element_instance_mut(key)?;
        *instance.task_listener_indices.entry(event_type).or_insert(0) += 1;
        Ok(())
    }

    fn reset_task_listener_indices(&self, key: Key) -> Result<()> {
        let mut data = self.write()?;
        if let Some(instance) = data.element_instances.get_mut(&key) {
            instance.task_listener_indices.clear();
        }
        Ok(())
    }
}

impl MutableUserTaskState for MemoryState {
    fn create_user_task(&self, record: UserTaskRecord, state: LifecycleState) -> Result<()> {
        let mut data = self.write()?;
        if data.user_tasks.contains_key(&record.user_task_key) {
            return Err(anyhow!("User task already exists: {}", record.user_task_key));
        }
        data.user_tasks.insert(
            record.user_task_key,
            UserTaskEntry {
                record,
                lifecycle_state: Some(state),
                intermediate: None,
                request_metadata: None,
            },
        );
        Ok(())
    }

    fn update_user_task(&self, record: UserTaskRecord) -> Result<()> {
        let key = record.user_task_key;
        let mut data = self.write()?;
        data.user_task_mut(key)?.record = record;
        Ok(())
    }

    fn update_lifecycle_state(&self, key: Key, state: LifecycleState) -> Result<()> {
        self.write()?.user_task_mut(key)?.lifecycle_state = Some(state);
        Ok(())
    }

    fn store_intermediate_state(&self, record: UserTaskRecord) -> Result<()> {
        let key = record.user_task_key;
        let mut data = self.write()?;
        data.user_task_mut(key)?.intermediate = Some(record);
        Ok(())
    }

    fn delete_intermediate_state(&self, key: Key) -> Result<()> {
        if let Some(task) = self.write()?.user_tasks.get_mut(&key) {
            task.intermediate = None;
        }
        Ok(())
    }

    fn delete_user_task(&self, key: Key) -> Result<()> {
        self.write()?.user_tasks.remove(&key);
        Ok(())
    }

    fn store_request_metadata(&self, key: Key, metadata: RequestMetadata) -> Result<()> {
        self.write()?.user_task_mut(key)?.request_metadata = Some(metadata);
        Ok(())
    }

    fn delete_request_metadata(&self, key: Key) -> Result<()> {
        if let Some(task) = self.write()?.user_tasks.get_mut(&key) {
            task.request_metadata = None;
        }
        Ok(())
    }
}

impl MutableTimerInstanceState for MemoryState {
    fn put_timer(&self, timer: TimerInstance) -> Result<()> {
        let mut data = self.write()?;
        if let Some(old) = data.timers.remove(&timer.key) {
            data.timer_due_index.remove(&(old.due_date, old.key));
        }
        data.timer_due_index.insert((timer.due_date, timer.key));
        data.timers.insert(timer.key, timer);
        Ok(())
    }

    fn remove_timer(&self, key: Key) -> Result<()> {
        let mut data = self.write()?;
        if let Some(old) = data.timers.remove(&key) {
            data.timer_due_index.remove(&(old.due_date, old.key));
        }
        Ok(())
    }
}

impl MutableAuthorizationState for MemoryState {
    fn grant(
        &self,
        owner_key: Key,
        resource_type: ResourceType,
        permission_type: PermissionType,
        resource_ids: &[String],
    ) -> Result<()> {
        let mut data = self.write()?;
        data.grants
            .entry(owner_key)
            .or_default()
            .entry(resource_type)
            .or_default()
            .entry(permission_type)
            .or_default()
            .extend(resource_ids.iter().cloned());
        Ok(())
    }
}

impl MutableUserState for MemoryState {
    fn put_user(&self, user: PersistedUser) -> Result<()> {
        self.write()?.users.insert(user.key, user);
        Ok(())
    }
}

impl MutableBannedInstanceState for MemoryState {
    fn ban_instance(&self, process_instance_key: Key) -> Result<()> {
        self.write()?.banned.insert(process_instance_key);
        Ok(())
    }
}

impl MutableProcessState for MemoryState {
    fn put_process(&self, process: DeployedProcess) -> Result<()> {
        self.write()?.processes.insert(process.key, process);
        Ok(())
    }
}

impl MutableVariableState for MemoryState {
    fn set_variable(&self, scope_key: Key, name: &str, value: serde_json::Value) -> Result<()> {
        self.write()?
            .variables
            .entry(scope_key)
            .or_default()
            .insert(name.to_string(), value);
        Ok(())
    }
}

impl MutableJobState for MemoryState {
    fn put_job(&self, key: Key, job: JobRecord) -> Result<()> {
        self.write()?.jobs.insert(key, job);
        Ok(())
    }

    fn remove_job(&self, key: Key) -> Result<()> {
        self.write()?.jobs.remove(&key);
        Ok(())
    }
}

impl MutableIncidentState for MemoryState {
    fn put_incident(&self, key: Key, incident: IncidentRecord) -> Result<()> {
        self.write()?.incidents.insert(key, incident);
        Ok(())
    }
}

impl KeyGenerator for MemoryState {
    fn next_key(&self) -> Result<Key> {
        let mut data = self.write()?;
        data.key_counter += 1;
        Ok(encode_partition_id(data.partition_id, data.key_counter))
    }

    fn advance_key(&self, key: Key) -> Result<()> {
        let mut data = self.write()?;
        if decode_partition_id(key) != data.partition_id {
            return Ok(());
        }
        let counter = key - encode_partition_id(data.partition_id, 0);
        data.key_counter = data.key_counter.max(counter);
        Ok(())
    }
}

impl TransactionContext for MemoryState {
    fn begin(&self) -> Result<()> {
        let snapshot = self.read()?.clone();
        let mut backup = self.backup.write().map_err(|e| anyhow!("Lock: {}", e))?;
        if backup.is_some() {
            return Err(anyhow!("Transaction already open"));
        }
        *backup = Some(snapshot);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut backup = self.backup.write().map_err(|e| anyhow!("Lock: {}", e))?;
        backup
            .take()
            .map(|_| ())
            .ok_or_else(|| anyhow!("No open transaction to commit"))
    }

    fn rollback(&self) -> Result<()> {
        let snapshot = self
            .backup
            .write()
            .map_err(|e| anyhow!("Lock: {}", e))?
            .take()
            .ok_or_else(|| anyhow!("No open transaction to roll back"))?;
        *self.write()? = snapshot;
        Ok(())
    }
}

impl ProcessingState for MemoryState {}
impl MutableProcessingState for MemoryState {}
