// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `kube_cluster.rs`

#[cfg(test)]
mod tests {
    use super::super::{create_error, tolerate_missing};
    use crate::errors::ClusterError;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(
            kube::core::Status::failure(&format!("request failed: {reason}"), reason)
                .with_code(code)
                .boxed(),
        )
    }

    #[test]
    fn test_conflict_maps_to_already_exists() {
        let error = create_error(api_error(409, "AlreadyExists"), "Pod", "shadow", "default");
        assert!(matches!(
            error,
            ClusterError::AlreadyExists { ref kind, ref name, .. } if kind == "Pod" && name == "shadow"
        ));
    }

    #[test]
    fn test_other_create_errors_pass_through() {
        let error = create_error(api_error(403, "Forbidden"), "Pod", "shadow", "default");
        assert!(matches!(error, ClusterError::Api(_)));
        assert!(!error.is_already_exists());
    }

    #[test]
    fn test_delete_of_missing_object_succeeds() {
        let result: Result<(), kube::Error> = Err(api_error(404, "NotFound"));
        assert!(tolerate_missing(result).is_ok());
    }

    #[test]
    fn test_delete_failure_is_reported() {
        let result: Result<(), kube::Error> = Err(api_error(500, "InternalError"));
        assert!(tolerate_missing(result).is_err());
    }
}
