//! Engine-level tests against the fixture adapters: blueprint history,
//! compose lifecycle, persistence across restarts, sources, and package
//! queries.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;
use weldr_backend::mock::{fixture_depsolver, fixture_registry, RejectingQueue, SlowDepsolver};
use weldr_backend::{Depsolver, InMemoryJobQueue, LocalWorker, WorkerQueue};
use weldr_core::{Adapters, ComposeRequest, CoreError, TestMode, Weldr, WeldrConfig};
use weldr_schema::{Blueprint, Package, SourceConfig};
use weldr_store::ComposeState;

fn adapters_with(depsolver: Arc<dyn Depsolver>, queue: Arc<dyn WorkerQueue>) -> Adapters {
    Adapters {
        depsolver,
        queue,
        registry: Arc::new(fixture_registry()),
    }
}

fn open_with(dir: &Path, adapters: Adapters) -> Weldr {
    match Weldr::open(&WeldrConfig::new(dir), adapters) {
        Ok(w) => w,
        Err(e) => panic!("engine failed to open: {e}"),
    }
}

fn open(dir: &Path) -> Weldr {
    open_with(
        dir,
        adapters_with(Arc::new(fixture_depsolver()), Arc::new(InMemoryJobQueue::new())),
    )
}

fn tmux_blueprint(version: &str) -> Blueprint {
    let mut bp = Blueprint::new("tmux-image");
    bp.description = "Terminal multiplexer image".to_owned();
    bp.version = version.to_owned();
    bp.packages.push(Package::new("tmux", "*"));
    bp
}

fn request(name: &str, compose_type: &str) -> ComposeRequest {
    ComposeRequest {
        blueprint_name: name.to_owned(),
        compose_type: compose_type.to_owned(),
        ..ComposeRequest::default()
    }
}

#[test]
fn pushed_blueprint_round_trips_through_info() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    weldr.push_blueprint(tmux_blueprint("0.1.0")).unwrap();

    let (found, errors) = weldr.blueprint_info(&["tmux-image".to_owned()]);
    assert!(errors.is_empty());
    assert_eq!(found.len(), 1);
    let (bp, changed) = &found[0];
    assert!(!changed);
    assert_eq!(bp.version, "0.1.0");
    assert_eq!(bp.packages, vec![Package::new("tmux", "*")]);
    assert_eq!(weldr.list_blueprints(0, 20).items, vec!["tmux-image".to_owned()]);
}

#[test]
fn pushing_same_version_bumps_patch() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    weldr.push_blueprint(tmux_blueprint("2.1.2")).unwrap();
    let mut changed = tmux_blueprint("2.1.2");
    changed.packages.push(Package::new("httpd", "2.4.*"));
    weldr.push_blueprint(changed).unwrap();

    let committed = weldr.blueprint_store().get_committed("tmux-image").unwrap();
    assert_eq!(committed.version, "2.1.3");
    let page = weldr.blueprint_changes(&["tmux-image".to_owned()], 0, 20);
    assert_eq!(page.blueprints[0].total, 2);
    assert_eq!((page.offset, page.limit), (0, 2));

    let names = ["tmux-image".to_owned(), "missing".to_owned()];
    let page = weldr.blueprint_changes(&names, 50, 20);
    assert_eq!(page.blueprints[0].changes.len(), 0);
    assert_eq!((page.offset, page.limit), (2, 0));
    assert_eq!(page.errors[0].id, "UnknownBlueprint");
}

#[test]
fn undo_restores_earlier_content() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    weldr.push_blueprint(tmux_blueprint("1.0.0")).unwrap();
    let first = weldr.blueprint_store().changes("tmux-image").unwrap()[0]
        .commit
        .as_str()
        .to_owned();
    let mut second = tmux_blueprint("1.1.0");
    second.packages.clear();
    weldr.push_blueprint(second).unwrap();

    weldr.undo_blueprint("tmux-image", &first).unwrap();
    let bp = weldr.blueprint_store().get_committed("tmux-image").unwrap();
    assert_eq!(bp.packages, vec![Package::new("tmux", "*")]);

    let err = weldr.undo_blueprint("tmux-image", "0000").unwrap_err();
    assert_eq!(err.id(), "UnknownCommit");
}

#[test]
fn tag_numbers_revisions_once() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    weldr.push_blueprint(tmux_blueprint("1.0.0")).unwrap();
    assert_eq!(weldr.tag_blueprint("tmux-image").unwrap(), 1);
    assert_eq!(weldr.tag_blueprint("tmux-image").unwrap_err().id(), "BlueprintsError");
    assert_eq!(weldr.tag_blueprint("missing").unwrap_err().id(), "BlueprintsError");
}

#[test]
fn invalid_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    let bp = Blueprint::new("no/slashes");
    assert_eq!(weldr.push_blueprint(bp.clone()).unwrap_err().id(), "InvalidChars");
    assert_eq!(weldr.push_workspace(bp).unwrap_err().id(), "InvalidChars");
    let err = weldr
        .submit_compose(&request("bad name!", "qcow2"), Some(TestMode::Finish), false)
        .unwrap_err();
    assert_eq!(err.id(), "InvalidChars");
}

#[test]
fn unknown_distro_is_refused_on_push() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    let mut bp = tmux_blueprint("1.0.0");
    bp.distro = "plan9".to_owned();
    let err = weldr.push_blueprint(bp).unwrap_err();
    assert_eq!(err.id(), "BlueprintsError");
    assert_eq!(err.to_string(), "'plan9' is not a valid distribution");
}

#[test]
fn workspace_diff_lists_changed_packages() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    weldr.push_blueprint(tmux_blueprint("1.0.0")).unwrap();
    let mut draft = tmux_blueprint("1.0.0");
    draft.packages = vec![Package::new("httpd", "*")];
    weldr.push_workspace(draft).unwrap();

    let diff = weldr.diff_blueprint("tmux-image", "NEWEST", "WORKSPACE").unwrap();
    assert_eq!(diff.len(), 2);
    let err = weldr.diff_blueprint("tmux-image", "HEAD", "WORKSPACE").unwrap_err();
    assert_eq!(err.id(), "UnknownCommit");
}

#[test]
fn depsolve_and_freeze_pin_packages() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    weldr.push_blueprint(tmux_blueprint("1.0.0")).unwrap();
    let names = ["tmux-image".to_owned(), "missing".to_owned()];

    let (solved, errors) = weldr.depsolve_blueprints(&names).unwrap();
    assert_eq!(errors.len(), 1);
    let deps: Vec<&str> = solved[0].1.iter().map(|p| p.name.as_str()).collect();
    assert!(deps.contains(&"libevent"), "{deps:?}");

    let (frozen, _) = weldr.freeze_blueprints(&names).unwrap();
    let tmux = &frozen[0].packages[0];
    assert_eq!(tmux.name, "tmux");
    assert_ne!(tmux.version, "*");
}

#[test]
fn slow_depsolve_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = WeldrConfig::new(dir.path());
    config.request_timeout = Duration::from_millis(50);
    let adapters = adapters_with(Arc::new(SlowDepsolver), Arc::new(InMemoryJobQueue::new()));
    let weldr = match Weldr::open(&config, adapters) {
        Ok(w) => w,
        Err(e) => panic!("{e}"),
    };
    weldr.push_blueprint(tmux_blueprint("1.0.0")).unwrap();
    let err = weldr.depsolve_blueprints(&["tmux-image".to_owned()]).unwrap_err();
    assert!(matches!(err, CoreError::RequestTimeout(_)));
    assert_eq!(err.status_code(), 504);
}

#[test]
fn test_mode_compose_lands_in_finished() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    weldr.push_blueprint(tmux_blueprint("1.0.0")).unwrap();
    let id = weldr
        .submit_compose(&request("tmux-image", "qcow2"), Some(TestMode::Finish), false)
        .unwrap();

    let composes = weldr.composes();
    assert!(composes.finished().iter().any(|c| c.id == id));
    assert!(composes.failed().is_empty());
    assert_eq!(composes.get(&id.to_string()).unwrap().state, ComposeState::Finished);
    assert!(composes.image(&id.to_string()).unwrap().path.exists());

    let err = weldr.cancel_compose(&id.to_string()).unwrap_err();
    assert_eq!(err.id(), "BuildInWrongState");

    let (deleted, errors) = weldr.delete_composes(&[id.to_string()]);
    assert_eq!(deleted, vec![id]);
    assert!(errors.is_empty());
}

#[test]
fn failing_test_compose_lands_in_failed() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    weldr.push_blueprint(tmux_blueprint("1.0.0")).unwrap();
    let id = weldr
        .submit_compose(&request("tmux-image", "tar"), Some(TestMode::Fail), false)
        .unwrap();
    let failed = weldr.composes().failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, id);
    assert_eq!(failed[0].error.as_ref().unwrap().kind, "TestError");
}

#[test]
fn compose_snapshots_workspace_draft() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    weldr.push_blueprint(tmux_blueprint("1.0.0")).unwrap();
    let mut draft = tmux_blueprint("1.0.0");
    draft.packages.push(Package::new("bash", "*"));
    weldr.push_workspace(draft).unwrap();

    let id = weldr
        .submit_compose(&request("tmux-image", "qcow2"), Some(TestMode::Finish), false)
        .unwrap();
    let compose = weldr.composes().get(&id.to_string()).unwrap();
    let names: Vec<&str> = compose.blueprint.packages.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["tmux", "bash"]);

    let mut scratch = Blueprint::new("scratch");
    scratch.version = "0.0.1".to_owned();
    weldr.push_workspace(scratch).unwrap();
    let id = weldr
        .submit_compose(&request("scratch", "tar"), Some(TestMode::Finish), false)
        .unwrap();
    assert_eq!(weldr.composes().get(&id.to_string()).unwrap().blueprint.name, "scratch");
}

#[test]
fn unknown_compose_uuid_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    let err = weldr.composes().get(&Uuid::new_v4().to_string()).unwrap_err();
    assert_eq!(err.id(), "UnknownUUID");
    let err = weldr.composes().get("not-a-uuid").unwrap_err();
    assert_eq!(err.to_string(), "not-a-uuid is not a valid build uuid");
}

#[test]
fn compose_of_unknown_type_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    weldr.push_blueprint(tmux_blueprint("1.0.0")).unwrap();
    let err = weldr
        .submit_compose(&request("tmux-image", "floppy"), None, false)
        .unwrap_err();
    assert_eq!(err.id(), "ComposeError");
}

#[test]
fn rejected_enqueue_leaves_no_compose_behind() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open_with(
        dir.path(),
        adapters_with(Arc::new(fixture_depsolver()), Arc::new(RejectingQueue)),
    );
    weldr.push_blueprint(tmux_blueprint("1.0.0")).unwrap();
    let err = weldr
        .submit_compose(&request("tmux-image", "qcow2"), None, false)
        .unwrap_err();
    assert_eq!(err.id(), "ComposeError");
    assert!(weldr.composes().registry().all().is_empty());
}

#[test]
fn local_worker_finishes_queued_compose() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(InMemoryJobQueue::new());
    let worker = LocalWorker::new(queue.clone())
        .with_build_time(Duration::from_millis(20))
        .spawn()
        .unwrap();
    let adapters = adapters_with(Arc::new(fixture_depsolver()), queue.clone());
    let weldr = open_with(dir.path(), adapters);
    weldr.push_blueprint(tmux_blueprint("1.0.0")).unwrap();
    let id = weldr
        .submit_compose(&request("tmux-image", "qcow2"), None, false)
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let state = loop {
        let state = weldr.composes().get(&id.to_string()).unwrap().state;
        if state.is_terminal() || Instant::now() > deadline {
            break state;
        }
        std::thread::sleep(Duration::from_millis(20));
    };
    worker.stop();

    assert_eq!(state, ComposeState::Finished);
    let compose = weldr.composes().get(&id.to_string()).unwrap();
    assert!(compose.packages.iter().any(|p| p.name == "tmux"));
    assert!(compose.job_started.is_some());
    assert!(weldr.composes().log(&id.to_string()).unwrap().contains("Build finished"));

    // Deleting the compose releases its queue job.
    let job = compose.job_id.unwrap();
    assert!(queue.job_info(job).is_ok());
    let (deleted, errors) = weldr.delete_composes(&[id.to_string()]);
    assert_eq!((deleted, errors.len()), (vec![id], 0));
    assert!(queue.job_info(job).is_err());
}

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let weldr = open(dir.path());
        weldr.push_blueprint(tmux_blueprint("1.0.0")).unwrap();
        weldr.push_workspace(tmux_blueprint("1.0.1")).unwrap();
        let id = weldr
            .submit_compose(&request("tmux-image", "qcow2"), Some(TestMode::Finish), false)
            .unwrap();
        weldr.close();
        id
    };

    let weldr = open(dir.path());
    let eff = weldr.blueprint_store().get("tmux-image").unwrap();
    assert!(eff.changed);
    assert_eq!(eff.blueprint.version, "1.0.1");
    assert_eq!(weldr.composes().get(&id.to_string()).unwrap().state, ComposeState::Finished);
}

#[test]
fn second_engine_cannot_share_state_dir() {
    let dir = tempfile::tempdir().unwrap();
    let _first = open(dir.path());
    let second = Weldr::open(
        &WeldrConfig::new(dir.path()),
        adapters_with(Arc::new(fixture_depsolver()), Arc::new(InMemoryJobQueue::new())),
    );
    assert!(second.is_err());
}

#[test]
fn user_sources_are_managed_and_system_sources_protected() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    let source = SourceConfig {
        name: "Extras".to_owned(),
        source_type: "yum-baseurl".to_owned(),
        url: "https://repo.example.com/extras".to_owned(),
        check_ssl: true,
        ..SourceConfig::default()
    };
    weldr.source_new("extras", source.clone()).unwrap();
    assert!(weldr.source_list(true).contains(&"extras".to_owned()));
    assert!(weldr.source_list(false).contains(&"Extras".to_owned()));
    assert!(weldr.repositories("fedora-40", "x86_64").unwrap().iter().any(|r| r.id == "extras"));

    let err = weldr.source_new("fedora", source.clone()).unwrap_err();
    assert_eq!(err.id(), "SystemSource");
    let err = weldr.source_delete("fedora", true).unwrap_err();
    assert_eq!(err.to_string(), "fedora is a system source, it cannot be deleted.");

    let mut bad = source;
    bad.distros = vec!["plan9".to_owned()];
    let err = weldr.source_new("extras", bad).unwrap_err();
    assert_eq!(err.id(), "ProjectsError");

    let (info, errors) = weldr.source_info(&["extras".to_owned(), "nope".to_owned()]);
    assert!(info.contains_key("extras"));
    assert_eq!(errors[0].msg, "nope is not a valid source");

    weldr.source_delete("extras", true).unwrap();
    assert_eq!(weldr.source_delete("extras", true).unwrap_err().id(), "UnknownSource");
}

#[test]
fn package_queries_use_distro_repositories() {
    let dir = tempfile::tempdir().unwrap();
    let weldr = open(dir.path());
    let (distro, arch) = weldr.resolve_distro(None, None).unwrap();
    assert_eq!(distro, "fedora-40");

    let modules = weldr
        .modules_list(&distro, &arch, &["tmu*".to_owned()], 0, 20)
        .unwrap();
    assert_eq!(modules.total, 1);
    assert_eq!(modules.items[0].name, "tmux");
    assert_eq!(modules.items[0].group_type, "rpm");

    let info = weldr.modules_info(&distro, &arch, &["tmux".to_owned()]).unwrap();
    let deps = info[0].dependencies.as_ref().unwrap();
    assert!(deps.iter().any(|d| d.name == "libevent"));

    let err = weldr
        .projects_info(&distro, &arch, &["no-such-package".to_owned()])
        .unwrap_err();
    assert_eq!(err.id(), "UnknownProject");

    let page = weldr.projects_list(&distro, &arch, 0, 2).unwrap();
    assert_eq!(page.items.len(), 2);
    assert!(page.total > 2);

    let err = weldr.resolve_distro(Some("plan9"), None).unwrap_err();
    assert_eq!(err.id(), "DistroError");
    assert_eq!(weldr.distros_list(None), vec!["fedora-40".to_owned(), "fedora-41".to_owned()]);
}
