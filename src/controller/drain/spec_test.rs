//! Unit tests for the drain job and placeholder pod builders.

#[cfg(test)]
mod tests {
    use k8s_openapi::api::batch::v1::Job;
    use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaim, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::ResourceExt;

    use crate::controller::drain::{
        claim_referenced_by, drainer_job_for, placeholder_pod_for, BuildError,
    };
    use crate::controller::resources::{
        buffer_volume_name, pool_labels, volume_claim_name, Component, BUFFER_PATH,
    };
    use crate::crd::{
        BufferPool, BufferPoolSpec, BufferVolumeMetricsConfig, ExtraVolume, ExtraVolumeSource,
        LogRotateConfig,
    };

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn pool_with(spec: BufferPoolSpec) -> BufferPool {
        let mut pool = BufferPool::new("logs", spec);
        pool.metadata.namespace = Some("logging".to_string());
        pool.metadata.uid = Some("0d7a5c1e".to_string());
        pool
    }

    fn volume(name: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("logging".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn pod_spec(job: &Job) -> &PodSpec {
        job.spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .expect("job has a pod spec")
    }

    fn container<'a>(spec: &'a PodSpec, name: &str) -> &'a Container {
        spec.containers
            .iter()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("container {name} missing"))
    }

    fn env_names(container: &Container) -> Vec<String> {
        container
            .env
            .iter()
            .flatten()
            .map(|e| e.name.clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Drain job
    // -----------------------------------------------------------------------

    #[test]
    fn job_is_named_after_the_ordinal_and_owned_by_the_pool() {
        let pool = pool_with(BufferPoolSpec::default());
        let pvc = volume(&volume_claim_name(&pool, 3));

        let job = drainer_job_for(&pool, &pvc).unwrap();

        assert_eq!(job.name_any(), "logs-buffer-3-drainer");
        assert_eq!(job.namespace().as_deref(), Some("logging"));
        assert_eq!(job.labels(), &pool_labels(&pool, Component::Drainer));
        let owners = job.owner_references();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "BufferPool");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn job_binds_the_volume_and_never_restarts() {
        let pool = pool_with(BufferPoolSpec::default());
        let pvc = volume(&volume_claim_name(&pool, 0));

        let job = drainer_job_for(&pool, &pvc).unwrap();
        let spec = pod_spec(&job);

        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(
            claim_referenced_by(spec, &buffer_volume_name(&pool)).as_deref(),
            Some(pvc.name_any().as_str())
        );
        assert_eq!(spec.service_account_name.as_deref(), Some("logs-buffer"));
    }

    #[test]
    fn drain_watch_mounts_the_buffer_read_only() {
        let pool = pool_with(BufferPoolSpec::default());
        let job = drainer_job_for(&pool, &volume(&volume_claim_name(&pool, 1))).unwrap();
        let spec = pod_spec(&job);

        let watch = container(spec, "drain-watch");
        let mount = watch
            .volume_mounts
            .iter()
            .flatten()
            .find(|m| m.name == buffer_volume_name(&pool))
            .expect("buffer mount");
        assert_eq!(mount.mount_path, BUFFER_PATH);
        assert_eq!(mount.read_only, Some(true));
        assert!(watch
            .image
            .as_deref()
            .is_some_and(|i| i.contains("drain-watch")));

        let mover = container(spec, "buffer-worker");
        let mover_mount = mover
            .volume_mounts
            .iter()
            .flatten()
            .find(|m| m.name == buffer_volume_name(&pool))
            .expect("data mover buffer mount");
        assert_eq!(mover_mount.read_only, None);
    }

    #[test]
    fn data_mover_runs_without_log_rotation() {
        let pool = pool_with(BufferPoolSpec {
            log_rotate: Some(LogRotateConfig {
                path: "/var/log/buffer".to_string(),
                max_size: "50M".to_string(),
                max_files: 3,
            }),
            ..Default::default()
        });
        let job = drainer_job_for(&pool, &volume(&volume_claim_name(&pool, 1))).unwrap();
        let spec = pod_spec(&job);

        let mover = container(spec, "buffer-worker");
        assert!(env_names(mover).iter().all(|n| !n.starts_with("LOGROTATE_")));
        assert!(env_names(mover).contains(&"BUFFER_PATH".to_string()));
        assert!(spec
            .volumes
            .iter()
            .flatten()
            .all(|v| v.name != "output-logs"));
    }

    #[test]
    fn metrics_sidecar_is_added_when_configured() {
        let plain = pool_with(BufferPoolSpec::default());
        let job = drainer_job_for(&plain, &volume(&volume_claim_name(&plain, 0))).unwrap();
        assert_eq!(pod_spec(&job).containers.len(), 2);

        let with_metrics = pool_with(BufferPoolSpec {
            buffer_volume_metrics: Some(BufferVolumeMetricsConfig::default()),
            ..Default::default()
        });
        let job = drainer_job_for(&with_metrics, &volume(&volume_claim_name(&with_metrics, 0)))
            .unwrap();
        let spec = pod_spec(&job);
        assert_eq!(spec.containers.len(), 3);
        let _ = container(spec, "buffer-metrics");
    }

    #[test]
    fn drain_settings_reach_the_job() {
        let mut spec = BufferPoolSpec::default();
        spec.scaling.drain.backoff_limit = Some(2);
        spec.scaling.drain.annotations = Some(
            [("sidecar.istio.io/inject".to_string(), "false".to_string())].into(),
        );
        let pool = pool_with(spec);

        let job = drainer_job_for(&pool, &volume(&volume_claim_name(&pool, 0))).unwrap();
        let job_spec = job.spec.as_ref().unwrap();

        assert_eq!(job_spec.backoff_limit, Some(2));
        let annotations = job_spec
            .template
            .metadata
            .as_ref()
            .and_then(|m| m.annotations.as_ref())
            .unwrap();
        assert_eq!(annotations["sidecar.istio.io/inject"], "false");
    }

    #[test]
    fn extra_volumes_are_mounted_in_the_job() {
        let pool = pool_with(BufferPoolSpec {
            extra_volumes: vec![ExtraVolume {
                volume_name: "certs".to_string(),
                path: "/etc/certs".to_string(),
                container_name: "buffer-worker".to_string(),
                read_only: true,
                source: ExtraVolumeSource {
                    secret: Some("forwarder-certs".to_string()),
                    ..Default::default()
                },
            }],
            ..Default::default()
        });

        let job = drainer_job_for(&pool, &volume(&volume_claim_name(&pool, 0))).unwrap();
        let spec = pod_spec(&job);

        assert!(spec.volumes.iter().flatten().any(|v| v.name == "certs"));
        assert!(container(spec, "buffer-worker")
            .volume_mounts
            .iter()
            .flatten()
            .any(|m| m.name == "certs" && m.mount_path == "/etc/certs"));
    }

    // -----------------------------------------------------------------------
    // Build errors
    // -----------------------------------------------------------------------

    #[test]
    fn volume_without_ordinal_is_rejected() {
        let pool = pool_with(BufferPoolSpec::default());
        let pvc = volume("scratch");

        assert_eq!(
            drainer_job_for(&pool, &pvc).unwrap_err(),
            BuildError::NoOrdinal("scratch".to_string())
        );
        assert_eq!(
            placeholder_pod_for(&pool, &pvc).unwrap_err(),
            BuildError::NoOrdinal("scratch".to_string())
        );
    }

    #[test]
    fn extra_volume_for_unknown_container_is_rejected() {
        let pool = pool_with(BufferPoolSpec {
            extra_volumes: vec![ExtraVolume {
                volume_name: "cache".to_string(),
                path: "/cache".to_string(),
                container_name: "sidecar".to_string(),
                read_only: false,
                source: ExtraVolumeSource {
                    empty_dir: true,
                    ..Default::default()
                },
            }],
            ..Default::default()
        });

        let err = drainer_job_for(&pool, &volume(&volume_claim_name(&pool, 0))).unwrap_err();
        assert!(matches!(err, BuildError::ExtraVolume(msg) if msg.contains("sidecar")));
    }

    #[test]
    fn extra_volume_without_source_is_rejected() {
        let pool = pool_with(BufferPoolSpec {
            extra_volumes: vec![ExtraVolume {
                volume_name: "cache".to_string(),
                path: "/cache".to_string(),
                container_name: "buffer-worker".to_string(),
                read_only: false,
                source: ExtraVolumeSource::default(),
            }],
            ..Default::default()
        });

        let err = drainer_job_for(&pool, &volume(&volume_claim_name(&pool, 0))).unwrap_err();
        assert!(matches!(err, BuildError::ExtraVolume(msg) if msg.contains("no source")));
    }

    #[test]
    fn empty_claim_name_is_rejected() {
        let mut spec = BufferPoolSpec::default();
        spec.buffer_storage.claim_name = String::new();
        let pool = pool_with(spec);

        assert_eq!(
            drainer_job_for(&pool, &volume("logs--logs-buffer-0")).unwrap_err(),
            BuildError::MissingClaimName
        );
    }

    // -----------------------------------------------------------------------
    // Placeholder pod
    // -----------------------------------------------------------------------

    #[test]
    fn placeholder_takes_the_ordinal_pod_name() {
        let pool = pool_with(BufferPoolSpec::default());
        let pod = placeholder_pod_for(&pool, &volume(&volume_claim_name(&pool, 4))).unwrap();

        assert_eq!(pod.name_any(), "logs-buffer-4");
        assert_eq!(pod.labels(), &pool_labels(&pool, Component::Placeholder));
        assert_eq!(pod.owner_references().len(), 1);
    }

    #[test]
    fn placeholder_is_never_scheduled() {
        let mut spec = BufferPoolSpec::default();
        spec.priority_class_name = Some("buffer-low".to_string());
        let pool = pool_with(spec);
        let pod = placeholder_pod_for(&pool, &volume(&volume_claim_name(&pool, 0))).unwrap();
        let spec = pod.spec.as_ref().unwrap();

        let selector = spec.node_selector.as_ref().unwrap();
        assert_eq!(selector["buffering.dev/placeholder"], "unschedulable");
        assert_eq!(spec.containers.len(), 1);
        assert!(spec.containers[0]
            .image
            .as_deref()
            .is_some_and(|i| i.starts_with("registry.k8s.io/pause")));
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.termination_grace_period_seconds, Some(0));
        assert_eq!(spec.priority_class_name.as_deref(), Some("buffer-low"));
        assert!(spec.volumes.is_none());
    }
}
