// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload status assessment.

use tracing::debug;

use super::Collaborators;
use crate::capabilities::{StatusState, WorkloadStatus};
use crate::config::ServiceOptions;
use crate::error::Result;
use crate::event::RelationKind;
use crate::persistence::{UNIT_PAUSED_KEY, is_truthy};
use crate::readiness::{self, ReadinessState};

fn status(state: StatusState, message: &str) -> WorkloadStatus {
    WorkloadStatus {
        state,
        message: message.to_string(),
    }
}

/// Derive the status shown to operators from current state.
///
/// The first unmet condition wins: paused, then a missing or incomplete
/// database relation, then the schema, then HA formation.
pub async fn assess(collaborators: &Collaborators, options: &ServiceOptions) -> Result<WorkloadStatus> {
    let local = collaborators.local.as_ref();
    let relations = collaborators.relations.as_ref();

    if is_truthy(local.get(UNIT_PAUSED_KEY).await?.as_deref()) {
        return Ok(status(
            StatusState::Maintenance,
            "Paused. Use 'resume' action to resume normal service.",
        ));
    }

    if relations
        .relation_ids(&RelationKind::SharedDb)
        .await?
        .is_empty()
    {
        return Ok(status(StatusState::Blocked, "Missing relations: database"));
    }

    let readiness =
        ReadinessState::evaluate(relations, local, collaborators.leadership.as_ref(), options)
            .await?;
    debug!(?readiness, "Assessing workload status");

    if !readiness.db_reachable {
        return Ok(status(StatusState::Waiting, "Incomplete relations: database"));
    }
    if !readiness.schema_initialized {
        return Ok(status(StatusState::Waiting, "Database not initialised"));
    }
    if readiness::expect_ha(relations, options).await? && !readiness::is_clustered(relations).await? {
        return Ok(status(StatusState::Waiting, "Waiting for HA cluster to form"));
    }

    Ok(status(StatusState::Active, "Unit is ready"))
}
