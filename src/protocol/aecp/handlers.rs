//! Built-in AEM command handlers.

use std::collections::HashMap;

use bytes::Bytes;

use super::aem::{
    AcquireEntity, ConfigurationPayload, DescriptorPayload, DescriptorType, LockEntity,
    ReadDescriptorCommand,
};
use super::message::{AemCommandType, AemStatus};
use super::model::{AemCommand, AemResponse, EntityState};
use crate::types::EntityId;

/// AEM command handler.
pub type AemHandler = Box<dyn Fn(&mut EntityState, &AemCommand) -> AemResponse + Send + Sync>;

/// Handlers installed on every engine.
pub(crate) fn builtin() -> HashMap<AemCommandType, AemHandler> {
    let mut table: HashMap<AemCommandType, AemHandler> = HashMap::new();
    table.insert(AemCommandType::ACQUIRE_ENTITY, Box::new(acquire_entity));
    table.insert(AemCommandType::LOCK_ENTITY, Box::new(lock_entity));
    table.insert(AemCommandType::ENTITY_AVAILABLE, Box::new(echo));
    table.insert(AemCommandType::CONTROLLER_AVAILABLE, Box::new(echo));
    table.insert(AemCommandType::READ_DESCRIPTOR, Box::new(read_descriptor));
    table.insert(AemCommandType::WRITE_DESCRIPTOR, Box::new(write_descriptor));
    table.insert(AemCommandType::GET_CONFIGURATION, Box::new(get_configuration));
    table.insert(AemCommandType::SET_CONFIGURATION, Box::new(set_configuration));
    table.insert(
        AemCommandType::REGISTER_UNSOLICITED_NOTIFICATION,
        Box::new(register_unsolicited),
    );
    table.insert(
        AemCommandType::DEREGISTER_UNSOLICITED_NOTIFICATION,
        Box::new(deregister_unsolicited),
    );
    table
}

fn echo(_state: &mut EntityState, cmd: &AemCommand) -> AemResponse {
    AemResponse::success(cmd.payload.clone())
}

fn acquire_entity(state: &mut EntityState, cmd: &AemCommand) -> AemResponse {
    let Ok(mut request) = AcquireEntity::decode(&cmd.payload) else {
        return AemResponse::rejected(AemStatus::BadArguments, cmd);
    };
    if request.descriptor_type != DescriptorType::ENTITY {
        return AemResponse::rejected(AemStatus::NotSupported, cmd);
    }
    let result = if request.is_release() {
        state.ownership.release(cmd.controller_id)
    } else {
        state
            .ownership
            .acquire(cmd.controller_id, request.is_persistent())
    };
    request.owner_id = state.ownership.owner();
    match result {
        Ok(changed) => {
            if changed {
                tracing::info!(
                    controller = %cmd.controller_id,
                    release = request.is_release(),
                    "Entity ownership changed"
                );
            }
            AemResponse::mutation(request.encode(), changed)
        }
        Err(status) => AemResponse::failed(status, request.encode()),
    }
}

fn lock_entity(state: &mut EntityState, cmd: &AemCommand) -> AemResponse {
    let Ok(mut request) = LockEntity::decode(&cmd.payload) else {
        return AemResponse::rejected(AemStatus::BadArguments, cmd);
    };
    if request.descriptor_type != DescriptorType::ENTITY {
        return AemResponse::rejected(AemStatus::NotSupported, cmd);
    }
    let result = if request.is_unlock() {
        state.ownership.unlock(cmd.controller_id, cmd.now)
    } else {
        state.ownership.lock(cmd.controller_id, cmd.now)
    };
    request.locked_id = state
        .ownership
        .lock_at(cmd.now)
        .map_or(EntityId::NONE, |lock| lock.owner);
    match result {
        Ok(changed) => AemResponse::mutation(request.encode(), changed),
        Err(status) => AemResponse::failed(status, request.encode()),
    }
}

fn read_descriptor(state: &mut EntityState, cmd: &AemCommand) -> AemResponse {
    let Ok(request) = ReadDescriptorCommand::decode(&cmd.payload) else {
        return AemResponse::rejected(AemStatus::BadArguments, cmd);
    };
    match state.read_descriptor(&request.key) {
        Some(body) => AemResponse::success(DescriptorPayload { key: request.key, body }.encode()),
        None => AemResponse::rejected(AemStatus::NoSuchDescriptor, cmd),
    }
}

fn write_descriptor(state: &mut EntityState, cmd: &AemCommand) -> AemResponse {
    let Ok(request) = DescriptorPayload::decode(&cmd.payload) else {
        return AemResponse::rejected(AemStatus::BadArguments, cmd);
    };
    match state.descriptors.write(&request.key, request.body) {
        Ok(()) => AemResponse::mutation(cmd.payload.clone(), true),
        Err(status) => AemResponse::rejected(status, cmd),
    }
}

fn configuration_payload(state: &EntityState) -> Bytes {
    ConfigurationPayload {
        configuration_index: state.current_configuration(),
    }
    .encode()
}

fn get_configuration(state: &mut EntityState, _cmd: &AemCommand) -> AemResponse {
    AemResponse::success(configuration_payload(state))
}

fn set_configuration(state: &mut EntityState, cmd: &AemCommand) -> AemResponse {
    let Ok(request) = ConfigurationPayload::decode(&cmd.payload) else {
        return AemResponse::rejected(AemStatus::BadArguments, cmd);
    };
    match state.set_current_configuration(request.configuration_index) {
        Ok(changed) => AemResponse::mutation(configuration_payload(state), changed),
        Err(status) => AemResponse::failed(status, configuration_payload(state)),
    }
}

fn register_unsolicited(state: &mut EntityState, cmd: &AemCommand) -> AemResponse {
    if state.register_unsolicited(cmd.controller_id) {
        tracing::debug!(controller = %cmd.controller_id, "Registered for unsolicited notifications");
    }
    AemResponse::success(cmd.payload.clone())
}

fn deregister_unsolicited(state: &mut EntityState, cmd: &AemCommand) -> AemResponse {
    state.deregister_unsolicited(cmd.controller_id);
    AemResponse::success(cmd.payload.clone())
}
