use std::{sync::Arc, time::Instant};

use swf::CharacterId;
use tracing::{debug, error};

use crate::{
    character::Resource,
    config::ResolvePolicy,
    error::{ResolveError, WaitError},
    interpreter::TagContext,
    movie::MovieDefinition,
};

/// Waits for `source` to export `name` and returns the exported resource.
///
/// Gives up once `source` can no longer export anything, or after
/// `policy.timeout_polls` consecutive polls in which `source` loaded no new
/// frame. A producer that keeps making progress is waited for indefinitely.
pub fn resolve_export(
    source: &MovieDefinition,
    name: &str,
    policy: &ResolvePolicy,
) -> Result<Resource, ResolveError> {
    if source.is_self_task() {
        error!(
            "Export `{}` of {} requested from its own loader thread",
            name,
            source.url()
        );
        return Err(ResolveError::SelfWait {
            name: name.to_owned(),
            url: source.url().to_owned(),
        });
    }

    let started = Instant::now();
    let mut idle_polls = 0;
    loop {
        // 先取结束状态再查导出表，避免错过结束前最后注册的导出
        let done = source.progress().is_finished() || source.frames_loaded() >= source.total_frames();
        if let Some(resource) = source.exports().lookup(name) {
            debug!(
                "Export `{}` of {} found after {} ms",
                name,
                source.url(),
                started.elapsed().as_millis()
            );
            return Ok(resource);
        }

        let frames_loaded = source.frames_loaded();
        if done {
            return Err(ResolveError::NotExported {
                name: name.to_owned(),
                url: source.url().to_owned(),
                frames_loaded,
                total_frames: source.total_frames(),
            });
        }
        if idle_polls >= policy.timeout_polls {
            return Err(ResolveError::TimedOut {
                name: name.to_owned(),
                url: source.url().to_owned(),
                waited_ms: started.elapsed().as_millis(),
                frames_loaded,
                total_frames: source.total_frames(),
            });
        }

        match source
            .progress()
            .wait_for_frame(frames_loaded + 1, Some(policy.poll_interval()))
        {
            Ok(()) => idle_polls = 0,
            Err(WaitError::TimedOut { .. }) => idle_polls += 1,
            // 加载已结束，下一轮会给出最终结果
            Err(_) => {}
        }
    }
}

/// Resolves each `(local id, name)` pair from `source` and defines the result
/// under the local id, also re-exporting it under the same name.
///
/// Failures are logged and skipped. Returns how many symbols were imported;
/// `source` is recorded as an import source of the importing movie if any
/// were.
pub fn import_resources(
    context: &mut TagContext<'_>,
    source: &Arc<MovieDefinition>,
    imports: &[(CharacterId, String)],
    policy: &ResolvePolicy,
) -> usize {
    let mut imported = 0;
    for (id, name) in imports {
        match resolve_export(source, name, policy) {
            Ok(resource) => {
                debug!(
                    "{}: importing `{}` from {} as character {}",
                    context.url(),
                    name,
                    source.url(),
                    id
                );
                context.define(*id, resource.clone());
                context.export_resource(name, *id, resource);
                imported += 1;
            }
            Err(err) => error!("{}: {}", context.url(), err),
        }
    }

    if imported > 0 {
        context.add_import_source(source);
    }
    imported
}
