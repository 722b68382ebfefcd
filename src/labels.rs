// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used on every shadow workload.
//!
//! Labels serve two purposes: provenance (so leftover shadows can be found and
//! garbage-collected) and routing (so a service-mesh rule can target a mesh version).

// ============================================================================
// Provenance Labels
// ============================================================================

/// Label marking which tool created the resource
pub const CONTROL_BY: &str = "kt.dev/control-by";

/// Value for [`CONTROL_BY`] on everything this tool creates
pub const KUBERNETES_TOOLKIT: &str = "kt-tunnel";

/// Label distinguishing shadow kinds for connect sessions
pub const KT_ROLE: &str = "kt.dev/role";

/// Role value for connect shadows
pub const ROLE_CONNECT_SHADOW: &str = "shadow";

// ============================================================================
// Mesh Labels
// ============================================================================

/// Label naming the shadow component kind
pub const KT_COMPONENT: &str = "kt.dev/component";

/// Component value for mesh shadows
pub const COMPONENT_MESH: &str = "mesh";

/// Label carrying the shadow workload name
pub const KT_NAME: &str = "kt.dev/name";

/// Label carrying the mesh version a routing rule can select
pub const KT_VERSION: &str = "version";
