//! The input resolver's view of the database.

use std::collections::HashMap;

use switchyard_core::{AlgorithmOutput, BuildId, BuildPipe, JobId, ResourceId, Version};
use switchyard_db::{Database, DbResult, ResourceVersionRecord};
use tracing::debug;

#[derive(Clone)]
pub struct VersionsDb {
    db: Database,
}

impl VersionsDb {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record versions found by a check, oldest first.
    pub async fn save_versions(&self, resource_id: ResourceId, versions: &[Version]) -> DbResult<bool> {
        let saved = self.db.algorithm.save_versions(resource_id, versions).await?;
        debug!(resource_id = %resource_id, count = versions.len(), saved, "Saved resource versions");
        Ok(saved)
    }

    pub async fn find_version(
        &self,
        resource_id: ResourceId,
        version: &Version,
    ) -> DbResult<Option<ResourceVersionRecord>> {
        self.db.algorithm.find_version(resource_id, version).await
    }

    /// Newest first.
    pub async fn versions(&self, resource_id: ResourceId) -> DbResult<Vec<ResourceVersionRecord>> {
        self.db.algorithm.versions(resource_id).await
    }

    pub async fn latest_version(
        &self,
        resource_id: ResourceId,
    ) -> DbResult<Option<ResourceVersionRecord>> {
        Ok(self.versions(resource_id).await?.into_iter().next())
    }

    /// Versions a succeeded build made available downstream: its explicit
    /// outputs, plus its inputs under names it did not output.
    pub async fn successful_build_outputs(&self, build_id: BuildId) -> DbResult<Vec<AlgorithmOutput>> {
        self.db.algorithm.successful_build_outputs(build_id).await
    }

    pub async fn build_pipes(&self, to_build_id: BuildId) -> DbResult<Vec<BuildPipe>> {
        self.db.algorithm.build_pipes(to_build_id).await
    }

    pub async fn latest_build_pipes(
        &self,
        to_build_id: BuildId,
        passed_jobs: &[JobId],
    ) -> DbResult<HashMap<JobId, BuildId>> {
        self.db.algorithm.latest_build_pipes(to_build_id, passed_jobs).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::testing::{fixture, output, resolve_all};
    use switchyard_core::{
        AlgorithmInput, AlgorithmVersion, BuildStatus, InputMapping, InputResult, Version,
    };

    #[tokio::test]
    async fn test_versions_are_ranked_by_check_order() {
        let fixture = fixture().await;
        let versions_db = fixture.pipeline.versions_db();
        let repo = fixture.resource("repo-a").await;
        let v1 = Version::from([("ref", "v1")]);
        let v2 = Version::from([("ref", "v2")]);

        assert!(versions_db.save_versions(repo.id, &[v1.clone(), v2.clone()]).await.unwrap());
        let latest = versions_db.latest_version(repo.id).await.unwrap().unwrap();
        assert_eq!(latest.version, v2);

        // Re-checking an older version moves it to the top.
        versions_db.save_versions(repo.id, &[v1.clone()]).await.unwrap();
        let versions = versions_db.versions(repo.id).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, v1);
        assert_eq!(versions[1].version, v2);
    }

    #[tokio::test]
    async fn test_find_version_ignores_key_order() {
        let fixture = fixture().await;
        let versions_db = fixture.pipeline.versions_db();
        let repo = fixture.resource("repo-a").await;

        let saved = Version::from([("ref", "abc"), ("branch", "main")]);
        versions_db.save_versions(repo.id, &[saved.clone()]).await.unwrap();

        let lookup = Version::from([("branch", "main"), ("ref", "abc")]);
        let found = versions_db.find_version(repo.id, &lookup).await.unwrap().unwrap();
        assert_eq!(found.version, saved);
        assert_eq!(found.fingerprint, saved.fingerprint());

        let other = Version::from([("ref", "def")]);
        assert!(versions_db.find_version(repo.id, &other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_output_keeps_check_order_of_known_version() {
        let fixture = fixture().await;
        let versions_db = fixture.pipeline.versions_db();
        let image = fixture.resource("image").await;
        let v1 = Version::from([("digest", "sha256:1")]);
        let v2 = Version::from([("digest", "sha256:2")]);
        let v3 = Version::from([("digest", "sha256:3")]);
        versions_db.save_versions(image.id, &[v1.clone(), v2.clone()]).await.unwrap();

        let build = fixture.unit.create_build().await.unwrap().unwrap();
        build.save_output(&output("image", "image", &v1)).await.unwrap();
        let versions = versions_db.versions(image.id).await.unwrap();
        assert_eq!(versions[0].version, v2);
        assert_eq!(versions[1].version, v1);

        // A version nobody checked yet becomes the newest.
        build.save_output(&output("image", "image", &v3)).await.unwrap();
        let latest = versions_db.latest_version(image.id).await.unwrap().unwrap();
        assert_eq!(latest.version, v3);
    }

    #[tokio::test]
    async fn test_successful_outputs_prefer_explicit_outputs() {
        let fixture = fixture().await;
        let versions_db = fixture.pipeline.versions_db();
        let v1 = Version::from([("ref", "v1")]);
        let v2 = Version::from([("ref", "v2")]);
        let v3 = Version::from([("ref", "v3")]);
        resolve_all(&fixture, &[("repo-a", &v1), ("repo-b", &v2)]).await;

        let build = fixture.unit.create_build().await.unwrap().unwrap();
        build.adopt_inputs_and_pipes().await.unwrap().unwrap();
        build.save_output(&output("repo-a", "repo-a", &v3)).await.unwrap();
        assert!(versions_db.successful_build_outputs(build.id()).await.unwrap().is_empty());

        build.start(&switchyard_core::Plan::default()).await.unwrap();
        build.finish(BuildStatus::Succeeded).await.unwrap();

        let repo_a = fixture.resource("repo-a").await;
        let repo_b = fixture.resource("repo-b").await;
        let mut outputs = versions_db.successful_build_outputs(build.id()).await.unwrap();
        outputs.sort_by(|a, b| a.input_name.cmp(&b.input_name));
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].input_name, "repo-a");
        assert_eq!(outputs[0].version, AlgorithmVersion::new(repo_a.id, v3.fingerprint()));
        assert_eq!(outputs[1].input_name, "repo-b");
        assert_eq!(outputs[1].version, AlgorithmVersion::new(repo_b.id, v2.fingerprint()));
    }

    #[tokio::test]
    async fn test_failed_build_has_no_successful_outputs() {
        let fixture = fixture().await;
        let versions_db = fixture.pipeline.versions_db();
        let v1 = Version::from([("ref", "v1")]);
        resolve_all(&fixture, &[("repo-a", &v1), ("repo-b", &v1)]).await;

        let build = fixture.unit.create_build().await.unwrap().unwrap();
        build.adopt_inputs_and_pipes().await.unwrap().unwrap();
        build.finish(BuildStatus::Failed).await.unwrap();

        assert!(versions_db.successful_build_outputs(build.id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_build_pipes_picks_newest_upstream() {
        let fixture = fixture().await;
        let versions_db = fixture.pipeline.versions_db();
        let v1 = Version::from([("ref", "v1")]);

        let mut upstream = Vec::new();
        for _ in 0..2 {
            resolve_all(&fixture, &[("repo-a", &v1), ("repo-b", &v1)]).await;
            let build = fixture.unit.create_build().await.unwrap().unwrap();
            build.adopt_inputs_and_pipes().await.unwrap().unwrap();
            build.finish(BuildStatus::Succeeded).await.unwrap();
            upstream.push(build.id());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let repo_a = fixture.resource("repo-a").await;
        let mut mapping = InputMapping::new();
        mapping.insert(
            "repo-a",
            InputResult::resolved(
                AlgorithmInput {
                    version: AlgorithmVersion::new(repo_a.id, v1.fingerprint()),
                    first_occurrence: true,
                },
                upstream.clone(),
            ),
        );
        fixture.deploy.save_next_input_mapping(&mapping, true).await.unwrap();

        let downstream = fixture.deploy.create_build().await.unwrap().unwrap();
        downstream.adopt_inputs_and_pipes().await.unwrap().unwrap();

        let pipes = versions_db
            .latest_build_pipes(downstream.id(), &[fixture.unit.id()])
            .await
            .unwrap();
        assert_eq!(pipes.len(), 1);
        assert_eq!(pipes.get(&fixture.unit.id()), Some(&upstream[1]));

        let none = versions_db
            .latest_build_pipes(downstream.id(), &[fixture.deploy.id()])
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_save_versions_on_unknown_resource() {
        let fixture = fixture().await;
        let versions_db = fixture.pipeline.versions_db();
        let v1 = Version::from([("ref", "v1")]);
        let unknown = switchyard_core::ResourceId::new();
        assert!(!versions_db.save_versions(unknown, &[v1]).await.unwrap());
        assert!(versions_db.versions(unknown).await.unwrap().is_empty());
    }
}
