use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use switchyard_core::{
    AlgorithmInput, AlgorithmOutput, AlgorithmVersion, BuildId, BuildPipe, InputMapping, JobId,
    ResourceId,
    Version,
};

use super::{MemoryStore, State};
use crate::DbResult;
use crate::repo::{
    AlgorithmRepo, BuildInput, BuildOutput, NextInputs, OutputVersion, ResourceVersionRecord,
};

impl State {
    fn build_inputs_of(&self, build_id: BuildId) -> Vec<BuildInput> {
        let Some(inputs) = self.build_inputs.get(&build_id) else {
            return Vec::new();
        };
        inputs
            .iter()
            .filter_map(|(name, input)| {
                let record = self.resource_version(&input.version)?;
                Some(BuildInput {
                    name: name.clone(),
                    resource_id: input.version.resource_id,
                    version: record.version.clone(),
                    first_occurrence: input.first_occurrence,
                })
            })
            .collect()
    }

    /// Whether some other build of the job already consumed `version` under `name`.
    fn job_consumed(
        &self,
        job_id: JobId,
        except: BuildId,
        name: &str,
        version: &AlgorithmVersion,
    ) -> bool {
        self.build_inputs.iter().any(|(build_id, inputs)| {
            *build_id != except
                && self
                    .builds
                    .get(build_id)
                    .is_some_and(|b| b.record.job_id == Some(job_id))
                && inputs.get(name).is_some_and(|i| &i.version == version)
        })
    }
}

#[async_trait]
impl AlgorithmRepo for MemoryStore {
    async fn save_versions(
        &self,
        resource_id: ResourceId,
        versions: &[Version],
    ) -> DbResult<bool> {
        let mut state = self.state.lock().await;
        if !state.resources.contains_key(&resource_id) {
            return Ok(false);
        }

        let mut check_order = state.next_check_order(resource_id) - 1;
        let known = state.versions.entry(resource_id).or_default();
        for version in versions {
            check_order += 1;
            let fingerprint = version.fingerprint();
            known
                .entry(fingerprint.clone())
                .and_modify(|record| record.check_order = check_order)
                .or_insert_with(|| ResourceVersionRecord {
                    resource_id,
                    version: version.clone(),
                    fingerprint,
                    metadata: Vec::new(),
                    check_order,
                });
        }
        Ok(true)
    }

    async fn find_version(
        &self,
        resource_id: ResourceId,
        version: &Version,
    ) -> DbResult<Option<ResourceVersionRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .versions
            .get(&resource_id)
            .and_then(|versions| versions.get(&version.fingerprint()))
            .cloned())
    }

    async fn versions(&self, resource_id: ResourceId) -> DbResult<Vec<ResourceVersionRecord>> {
        let state = self.state.lock().await;
        let mut versions: Vec<ResourceVersionRecord> = state
            .versions
            .get(&resource_id)
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default();
        versions.sort_by(|a, b| b.check_order.cmp(&a.check_order));
        Ok(versions)
    }

    async fn save_next_input_mapping(
        &self,
        job_id: JobId,
        mapping: &InputMapping,
        resolved: bool,
    ) -> DbResult<bool> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        job.record.inputs_determined = resolved;

        let pipes: BTreeSet<BuildId> = mapping
            .passed_build_ids()
            .into_iter()
            .filter(|id| state.builds.contains_key(id))
            .collect();
        state.next_inputs.insert(job_id, mapping.clone());
        state.next_pipes.insert(job_id, pipes);
        Ok(true)
    }

    async fn next_input_mapping(&self, job_id: JobId) -> DbResult<Option<NextInputs>> {
        let state = self.state.lock().await;
        let Some(job) = state.jobs.get(&job_id) else {
            return Ok(None);
        };
        Ok(Some(NextInputs {
            mapping: state.next_inputs.get(&job_id).cloned().unwrap_or_default(),
            resolved: job.record.inputs_determined,
        }))
    }

    async fn adopt_inputs_and_pipes(&self, build_id: BuildId) -> DbResult<Option<Vec<BuildInput>>> {
        let mut state = self.state.lock().await;
        let Some(job_id) = state.builds.get(&build_id).and_then(|b| b.record.job_id) else {
            return Ok(None);
        };
        if !state
            .jobs
            .get(&job_id)
            .is_some_and(|job| job.record.inputs_determined)
        {
            return Ok(None);
        }

        state.build_inputs.remove(&build_id);
        state.build_pipes.retain(|(to, _)| *to != build_id);

        let mapping = state.next_inputs.remove(&job_id).unwrap_or_default();
        let inputs: BTreeMap<String, AlgorithmInput> = mapping
            .resolved_inputs()
            .map(|(name, input, _)| {
                let first_occurrence = input.first_occurrence
                    && !state.job_consumed(job_id, build_id, name, &input.version);
                (
                    name.to_string(),
                    AlgorithmInput {
                        version: input.version.clone(),
                        first_occurrence,
                    },
                )
            })
            .collect();
        state.build_inputs.insert(build_id, inputs);

        let pipes = state.next_pipes.remove(&job_id).unwrap_or_default();
        for from_build_id in pipes {
            state.build_pipes.insert((build_id, from_build_id));
        }

        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.record.inputs_determined = false;
        }

        Ok(Some(state.build_inputs_of(build_id)))
    }

    async fn save_output(&self, build_id: BuildId, output: &OutputVersion) -> DbResult<bool> {
        let mut state = self.state.lock().await;
        let Some(pipeline_id) = state.builds.get(&build_id).and_then(|b| b.record.pipeline_id)
        else {
            return Ok(false);
        };
        let Some(resource) = state
            .resources
            .values_mut()
            .find(|r| r.pipeline_id == pipeline_id && r.name == output.resource_name)
        else {
            return Ok(false);
        };

        resource.resource_type = output.resource_type.clone();
        resource.source = output.source.clone();
        resource.resource_types = output.resource_types.clone();
        let resource_id = resource.id;

        let fingerprint = output.version.fingerprint();
        let check_order = state.next_check_order(resource_id);
        state
            .versions
            .entry(resource_id)
            .or_default()
            .entry(fingerprint.clone())
            .and_modify(|record| {
                if !output.metadata.is_empty() {
                    record.metadata = output.metadata.clone();
                }
            })
            .or_insert_with(|| ResourceVersionRecord {
                resource_id,
                version: output.version.clone(),
                fingerprint: fingerprint.clone(),
                metadata: output.metadata.clone(),
                check_order,
            });

        state
            .build_outputs
            .entry(build_id)
            .or_default()
            .insert(
                output.output_name.clone(),
                AlgorithmVersion::new(resource_id, fingerprint),
            );
        Ok(true)
    }

    async fn resources(&self, build_id: BuildId) -> DbResult<(Vec<BuildInput>, Vec<BuildOutput>)> {
        let state = self.state.lock().await;
        let inputs = state.build_inputs_of(build_id);
        let outputs = state
            .build_outputs
            .get(&build_id)
            .map(|outputs| {
                outputs
                    .iter()
                    .filter_map(|(name, version)| {
                        let record = state.resource_version(version)?;
                        Some(BuildOutput {
                            name: name.clone(),
                            resource_id: version.resource_id,
                            version: record.version.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok((inputs, outputs))
    }

    async fn successful_build_outputs(
        &self,
        build_id: BuildId,
    ) -> DbResult<Vec<AlgorithmOutput>> {
        let state = self.state.lock().await;
        Ok(state
            .successful_outputs
            .get(&build_id)
            .map(|ledger| {
                ledger
                    .iter()
                    .map(|(name, version)| AlgorithmOutput {
                        version: version.clone(),
                        input_name: name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn build_pipes(&self, to_build_id: BuildId) -> DbResult<Vec<BuildPipe>> {
        let state = self.state.lock().await;
        Ok(state
            .build_pipes
            .iter()
            .filter(|(to, _)| *to == to_build_id)
            .filter_map(|(_, from_build_id)| {
                let from_job_id = state.builds.get(from_build_id)?.record.job_id?;
                Some(BuildPipe {
                    from_build_id: *from_build_id,
                    from_job_id,
                    to_build_id,
                })
            })
            .collect())
    }

    async fn latest_build_pipes(
        &self,
        to_build_id: BuildId,
        passed_jobs: &[JobId],
    ) -> DbResult<HashMap<JobId, BuildId>> {
        let state = self.state.lock().await;
        let mut latest: HashMap<JobId, BuildId> = HashMap::new();

        for (_, from_build_id) in state
            .build_pipes
            .iter()
            .filter(|(to, _)| *to == to_build_id)
        {
            let Some(job_id) = state
                .builds
                .get(from_build_id)
                .and_then(|b| b.record.job_id)
            else {
                continue;
            };
            if !passed_jobs.contains(&job_id) {
                continue;
            }
            latest
                .entry(job_id)
                .and_modify(|current| *current = (*current).max(*from_build_id))
                .or_insert(*from_build_id);
        }
        Ok(latest)
    }
}
