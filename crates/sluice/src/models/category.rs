/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Shard scopes, outbox categories and the scope → category table.
//!
//! Both enums are persisted as `SMALLINT` codes, so the numeric values are
//! part of the storage format and must never be reused.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The routing domain a message is sharded by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardScope {
    Organization,
    User,
    Webhook,
    AuditLog,
    UserIp,
    Integration,
    App,
    Team,
    Provision,
}

/// The kind of change a message propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxCategory {
    UserUpdate,
    WebhookProxy,
    OrganizationUpdate,
    OrganizationMemberUpdate,
    AuditLogEvent,
    UserIpEvent,
    IntegrationUpdate,
    ProjectUpdate,
    ApiApplicationUpdate,
    AppInstallationUpdate,
    TeamUpdate,
    OrganizationIntegrationUpdate,
    SendSignal,
    OrganizationMappingCustomerIdUpdate,
    OrgAuthTokenUpdateUsed,
    ProvisionOrganization,
    PostOrganizationProvision,
    DisableAuthProvider,
    ResetIdpFlags,
    MarkInvalidSso,
    AuthProviderUpdate,
    AuthIdentityUpdate,
    OrganizationMemberTeamUpdate,
    OrganizationSlugReservationUpdate,
    ApiKeyUpdate,
    AppUpdate,
}

/// Categories accepted by each scope.
static SCOPE_CATEGORIES: &[(ShardScope, &[OutboxCategory])] = &[
    (
        ShardScope::Organization,
        &[
            OutboxCategory::OrganizationUpdate,
            OutboxCategory::OrganizationMemberUpdate,
            OutboxCategory::ProjectUpdate,
            OutboxCategory::OrganizationIntegrationUpdate,
            OutboxCategory::SendSignal,
            OutboxCategory::OrganizationMappingCustomerIdUpdate,
            OutboxCategory::OrgAuthTokenUpdateUsed,
            OutboxCategory::PostOrganizationProvision,
            OutboxCategory::DisableAuthProvider,
            OutboxCategory::ResetIdpFlags,
            OutboxCategory::MarkInvalidSso,
            OutboxCategory::AuthProviderUpdate,
            OutboxCategory::OrganizationMemberTeamUpdate,
            OutboxCategory::OrganizationSlugReservationUpdate,
            OutboxCategory::ApiKeyUpdate,
        ],
    ),
    (
        ShardScope::User,
        &[OutboxCategory::UserUpdate, OutboxCategory::AuthIdentityUpdate],
    ),
    (ShardScope::Webhook, &[OutboxCategory::WebhookProxy]),
    (ShardScope::AuditLog, &[OutboxCategory::AuditLogEvent]),
    (ShardScope::UserIp, &[OutboxCategory::UserIpEvent]),
    (ShardScope::Integration, &[OutboxCategory::IntegrationUpdate]),
    (
        ShardScope::App,
        &[
            OutboxCategory::ApiApplicationUpdate,
            OutboxCategory::AppInstallationUpdate,
            OutboxCategory::AppUpdate,
        ],
    ),
    (ShardScope::Team, &[OutboxCategory::TeamUpdate]),
    (ShardScope::Provision, &[OutboxCategory::ProvisionOrganization]),
];

impl ShardScope {
    pub const ALL: [ShardScope; 9] = [
        ShardScope::Organization,
        ShardScope::User,
        ShardScope::Webhook,
        ShardScope::AuditLog,
        ShardScope::UserIp,
        ShardScope::Integration,
        ShardScope::App,
        ShardScope::Team,
        ShardScope::Provision,
    ];

    /// Storage code for this scope.
    pub fn code(self) -> i16 {
        match self {
            ShardScope::Organization => 0,
            ShardScope::User => 1,
            ShardScope::Webhook => 2,
            ShardScope::AuditLog => 3,
            ShardScope::UserIp => 4,
            ShardScope::Integration => 5,
            ShardScope::App => 6,
            ShardScope::Team => 7,
            ShardScope::Provision => 8,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, ValidationError> {
        Self::ALL
            .into_iter()
            .find(|scope| scope.code() == code)
            .ok_or(ValidationError::UnknownScope(code))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShardScope::Organization => "organization",
            ShardScope::User => "user",
            ShardScope::Webhook => "webhook",
            ShardScope::AuditLog => "audit_log",
            ShardScope::UserIp => "user_ip",
            ShardScope::Integration => "integration",
            ShardScope::App => "app",
            ShardScope::Team => "team",
            ShardScope::Provision => "provision",
        }
    }

    /// Categories that may be enqueued under this scope.
    pub fn categories(self) -> &'static [OutboxCategory] {
        SCOPE_CATEGORIES
            .iter()
            .find(|(scope, _)| *scope == self)
            .map(|(_, categories)| *categories)
            .unwrap_or(&[])
    }

    pub fn has_category(self, category: OutboxCategory) -> bool {
        self.categories().contains(&category)
    }
}

impl OutboxCategory {
    pub const ALL: [OutboxCategory; 26] = [
        OutboxCategory::UserUpdate,
        OutboxCategory::WebhookProxy,
        OutboxCategory::OrganizationUpdate,
        OutboxCategory::OrganizationMemberUpdate,
        OutboxCategory::AuditLogEvent,
        OutboxCategory::UserIpEvent,
        OutboxCategory::IntegrationUpdate,
        OutboxCategory::ProjectUpdate,
        OutboxCategory::ApiApplicationUpdate,
        OutboxCategory::AppInstallationUpdate,
        OutboxCategory::TeamUpdate,
        OutboxCategory::OrganizationIntegrationUpdate,
        OutboxCategory::SendSignal,
        OutboxCategory::OrganizationMappingCustomerIdUpdate,
        OutboxCategory::OrgAuthTokenUpdateUsed,
        OutboxCategory::ProvisionOrganization,
        OutboxCategory::PostOrganizationProvision,
        OutboxCategory::DisableAuthProvider,
        OutboxCategory::ResetIdpFlags,
        OutboxCategory::MarkInvalidSso,
        OutboxCategory::AuthProviderUpdate,
        OutboxCategory::AuthIdentityUpdate,
        OutboxCategory::OrganizationMemberTeamUpdate,
        OutboxCategory::OrganizationSlugReservationUpdate,
        OutboxCategory::ApiKeyUpdate,
        OutboxCategory::AppUpdate,
    ];

    /// Storage code for this category.
    ///
    /// Codes 4, 13 and 19 were retired and stay unassigned.
    pub fn code(self) -> i16 {
        match self {
            OutboxCategory::UserUpdate => 0,
            OutboxCategory::WebhookProxy => 1,
            OutboxCategory::OrganizationUpdate => 2,
            OutboxCategory::OrganizationMemberUpdate => 3,
            OutboxCategory::AuditLogEvent => 5,
            OutboxCategory::UserIpEvent => 6,
            OutboxCategory::IntegrationUpdate => 7,
            OutboxCategory::ProjectUpdate => 8,
            OutboxCategory::ApiApplicationUpdate => 9,
            OutboxCategory::AppInstallationUpdate => 10,
            OutboxCategory::TeamUpdate => 11,
            OutboxCategory::OrganizationIntegrationUpdate => 12,
            OutboxCategory::SendSignal => 14,
            OutboxCategory::OrganizationMappingCustomerIdUpdate => 15,
            OutboxCategory::OrgAuthTokenUpdateUsed => 16,
            OutboxCategory::ProvisionOrganization => 17,
            OutboxCategory::PostOrganizationProvision => 18,
            OutboxCategory::DisableAuthProvider => 20,
            OutboxCategory::ResetIdpFlags => 21,
            OutboxCategory::MarkInvalidSso => 22,
            OutboxCategory::AuthProviderUpdate => 24,
            OutboxCategory::AuthIdentityUpdate => 25,
            OutboxCategory::OrganizationMemberTeamUpdate => 26,
            OutboxCategory::OrganizationSlugReservationUpdate => 27,
            OutboxCategory::ApiKeyUpdate => 28,
            OutboxCategory::AppUpdate => 30,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, ValidationError> {
        Self::ALL
            .into_iter()
            .find(|category| category.code() == code)
            .ok_or(ValidationError::UnknownCategory(code))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutboxCategory::UserUpdate => "user_update",
            OutboxCategory::WebhookProxy => "webhook_proxy",
            OutboxCategory::OrganizationUpdate => "organization_update",
            OutboxCategory::OrganizationMemberUpdate => "organization_member_update",
            OutboxCategory::AuditLogEvent => "audit_log_event",
            OutboxCategory::UserIpEvent => "user_ip_event",
            OutboxCategory::IntegrationUpdate => "integration_update",
            OutboxCategory::ProjectUpdate => "project_update",
            OutboxCategory::ApiApplicationUpdate => "api_application_update",
            OutboxCategory::AppInstallationUpdate => "app_installation_update",
            OutboxCategory::TeamUpdate => "team_update",
            OutboxCategory::OrganizationIntegrationUpdate => "organization_integration_update",
            OutboxCategory::SendSignal => "send_signal",
            OutboxCategory::OrganizationMappingCustomerIdUpdate => {
                "organization_mapping_customer_id_update"
            }
            OutboxCategory::OrgAuthTokenUpdateUsed => "org_auth_token_update_used",
            OutboxCategory::ProvisionOrganization => "provision_organization",
            OutboxCategory::PostOrganizationProvision => "post_organization_provision",
            OutboxCategory::DisableAuthProvider => "disable_auth_provider",
            OutboxCategory::ResetIdpFlags => "reset_idp_flags",
            OutboxCategory::MarkInvalidSso => "mark_invalid_sso",
            OutboxCategory::AuthProviderUpdate => "auth_provider_update",
            OutboxCategory::AuthIdentityUpdate => "auth_identity_update",
            OutboxCategory::OrganizationMemberTeamUpdate => "organization_member_team_update",
            OutboxCategory::OrganizationSlugReservationUpdate => {
                "organization_slug_reservation_update"
            }
            OutboxCategory::ApiKeyUpdate => "api_key_update",
            OutboxCategory::AppUpdate => "app_update",
        }
    }

    /// The scope this category is registered under.
    pub fn scope(self) -> ShardScope {
        SCOPE_CATEGORIES
            .iter()
            .find(|(_, categories)| categories.contains(&self))
            .map(|(scope, _)| *scope)
            // every category appears in the table; checked by tests
            .unwrap_or(ShardScope::Organization)
    }

    /// Checks the category against the scope → category table.
    pub fn validate_scope(self, scope: ShardScope) -> Result<(), ValidationError> {
        if scope.has_category(self) {
            Ok(())
        } else {
            Err(ValidationError::CategoryNotInScope {
                scope,
                category: self,
            })
        }
    }
}

impl fmt::Display for ShardScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for OutboxCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShardScope {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|scope| scope.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnknownName {
                kind: "shard scope",
                name: s.to_string(),
            })
    }
}

impl FromStr for OutboxCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnknownName {
                kind: "outbox category",
                name: s.to_string(),
            })
    }
}
