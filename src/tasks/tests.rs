use super::*;
use crate::catalogue::{MockCatalogue, ModInfo, RevisionInfo};
use crate::config::{InstallRoots, TaskSettings};
use crate::db::InstallStatus;
use crate::download::{FetchOutcome, MockDownloadSource, UrlResolution};
use crate::hub::StatusMessage;
use crate::status::{ErrorCode, OpState};
use chrono::{TimeZone, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

struct Fixture {
    dir: TempDir,
    db: Arc<Database>,
    hub: Arc<Hub>,
    events: UnboundedReceiver<String>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("smods.db")).unwrap());
        let hub = Arc::new(Hub::new());
        let (_, mut events) = hub.register();
        events.try_recv().unwrap();
        Self {
            dir,
            db,
            hub,
            events,
        }
    }

    fn install_dir(&self) -> PathBuf {
        self.dir.path().join("game")
    }

    fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    fn downloads_dir(&self) -> PathBuf {
        self.dir.path().join("downloads")
    }

    fn mods_dir(&self) -> PathBuf {
        self.install_dir().join("Files").join("Mods")
    }

    fn settings(&self) -> TaskSettings {
        TaskSettings {
            roots: Some(InstallRoots::new(self.install_dir(), self.data_dir())),
            downloads_dir: self.downloads_dir(),
            manual_download_timeout: Duration::ZERO,
            open_browser_on_auth_denied: false,
        }
    }

    fn tasks(&self, catalogue: MockCatalogue, source: MockDownloadSource) -> ModTasks {
        self.tasks_with(catalogue, source, self.settings())
    }

    fn tasks_with(
        &self,
        catalogue: MockCatalogue,
        source: MockDownloadSource,
        settings: TaskSettings,
    ) -> ModTasks {
        ModTasks::new(
            self.db.clone(),
            self.hub.clone(),
            Arc::new(catalogue),
            Arc::new(source),
            settings,
        )
    }

    /// Every status message published so far, oldest first
    fn drain(&mut self) -> Vec<StatusMessage> {
        let mut messages = Vec::new();
        while let Ok(text) = self.events.try_recv() {
            messages.push(serde_json::from_str(&text).unwrap());
        }
        messages
    }

    fn seed_mod(&self, mod_id: &str) {
        let mut session = self.db.session().unwrap();
        session.get_or_create_mod(mod_id, mod_id).unwrap();
        session.commit().unwrap();
    }

    fn seed_installed(
        &self,
        mod_id: &str,
        revision: &RevisionInfo,
        status: InstallStatus,
        path: Option<&str>,
    ) {
        let mut session = self.db.session().unwrap();
        let (m, _) = session.get_or_create_mod(mod_id, mod_id).unwrap();
        let (r, _) = session.get_or_create_revision(revision, &m).unwrap();
        session.set_installed(&m, &r, status, path).unwrap();
        session.commit().unwrap();
    }

    fn seed_downloaded(&self, mod_id: &str, revision: &RevisionInfo, path: &Path) {
        let mut session = self.db.session().unwrap();
        let (m, _) = session.get_or_create_mod(mod_id, mod_id).unwrap();
        let (r, _) = session.get_or_create_revision(revision, &m).unwrap();
        session
            .add_downloaded(&m, &r, &path.to_string_lossy())
            .unwrap();
        session.commit().unwrap();
    }
}

fn revision(id: &str) -> RevisionInfo {
    RevisionInfo {
        id: id.into(),
        name: format!("Release {}", id),
        date: Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
        download_url: format!("https://mods.example.com/download/{}", id),
        filename: format!("{}.zip", id),
    }
}

fn mod_info(id: &str, latest: RevisionInfo, has_dependencies: bool) -> ModInfo {
    ModInfo {
        id: id.into(),
        name: format!("Mod {}", id),
        steam_id: None,
        authors: vec!["someone".into()],
        category: "Mod".into(),
        has_dependencies,
        latest_revision: latest,
        url: None,
    }
}

/// Archive with a single root folder named after the file stem
fn write_archive(path: &Path) {
    let root = path.file_stem().unwrap().to_string_lossy().to_string();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default();
    zip.add_directory(format!("{}/", root), options).unwrap();
    zip.start_file(format!("{}/{}.dll", root, root), options)
        .unwrap();
    zip.write_all(b"payload").unwrap();
    zip.finish().unwrap();
}

/// Resolve every revision to a CDN url and serve archives for it
fn serve_archives(source: &mut MockDownloadSource) {
    source
        .expect_resolve_url()
        .returning(|rev| Ok(UrlResolution::Url(format!("https://cdn.example.com/{}", rev.filename))));
    source.expect_fetch().returning(|url, dir, progress, _| {
        let path = dir.join(url.rsplit('/').next().unwrap());
        write_archive(&path);
        progress(7, 7);
        Ok(FetchOutcome::File(path))
    });
}

fn code_of(err: &anyhow::Error) -> ErrorCode {
    err.downcast_ref::<InstallError>()
        .expect("install error")
        .code()
}

fn states(messages: &[StatusMessage], channel: &str) -> Vec<OpState> {
    messages
        .iter()
        .filter(|m| m.channel == channel)
        .filter_map(|m| m.payload.operation.as_ref().map(|op| op.state))
        .collect()
}

fn last_on<'a>(messages: &'a [StatusMessage], channel: &str) -> &'a StatusMessage {
    messages
        .iter()
        .rev()
        .find(|m| m.channel == channel)
        .expect("no message on channel")
}

#[tokio::test]
async fn fresh_install_reaches_done() {
    let mut fx = Fixture::new();
    let info = mod_info("M1", revision("R1"), false);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .times(1)
        .returning(move |_| Ok(info.clone()));
    let mut source = MockDownloadSource::new();
    serve_archives(&mut source);

    fx.tasks(catalogue, source)
        .install("M1", Some("R1"), true)
        .await
        .unwrap();

    let messages = fx.drain();
    assert_eq!(
        states(&messages, "M1"),
        vec![
            OpState::GetModInfo,
            OpState::GetDownloadUrl,
            OpState::Downloading,
            OpState::Unzip,
            OpState::Copying,
            OpState::Copying,
            OpState::Done,
        ]
    );
    assert!(messages[0].payload.installing);

    let last = last_on(&messages, "M1");
    assert_eq!(last.payload.installed.as_ref().unwrap().id, "R1");
    assert!(!last.payload.installing);
    assert_eq!(last.payload.downloaded.len(), 1);
    assert_eq!(last.payload.operation.as_ref().unwrap().state, OpState::Done);

    let installed_path = fx.mods_dir().join("R1");
    assert!(installed_path.join("R1.dll").is_file());
    let (row, _) = fx.db.installed_revision("M1").unwrap().unwrap();
    assert_eq!(row.status, InstallStatus::Installed);
    assert_eq!(row.path.as_deref(), installed_path.to_str());
}

#[tokio::test]
async fn spawned_install_defaults_to_latest_revision() {
    let fx = Fixture::new();
    let info = mod_info("M1", revision("R3"), false);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(info.clone()));
    let mut source = MockDownloadSource::new();
    serve_archives(&mut source);

    fx.tasks(catalogue, source)
        .start_install("M1", None, false)
        .await
        .unwrap()
        .unwrap();

    let (row, revision) = fx.db.installed_revision("M1").unwrap().unwrap();
    assert_eq!(row.revision_id, "R3");
    assert_eq!(revision.name, "Release R3");
}

#[tokio::test]
async fn installing_another_revision_is_rejected() {
    let mut fx = Fixture::new();
    fx.seed_installed("M1", &revision("R1"), InstallStatus::Installed, Some("/games/M1"));
    let info = mod_info("M1", revision("R2"), false);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(info.clone()));

    let err = fx
        .tasks(catalogue, MockDownloadSource::new())
        .install("M1", Some("R2"), true)
        .await
        .unwrap_err();

    assert_eq!(code_of(&err), ErrorCode::ModAlreadyInstalled);
    let (row, _) = fx.db.installed_revision("M1").unwrap().unwrap();
    assert_eq!(row.revision_id, "R1");
    assert_eq!(row.status, InstallStatus::Installed);
    assert_eq!(row.path.as_deref(), Some("/games/M1"));

    let messages = fx.drain();
    let last = last_on(&messages, "M1");
    let op = last.payload.operation.as_ref().unwrap();
    assert_eq!(op.code(), Some("mod_already_installed"));
    assert_eq!(op.data["installed_revision"]["id"], "R1");
    assert_eq!(last.payload.installed.as_ref().unwrap().id, "R1");
}

#[tokio::test]
async fn reinstalling_the_same_revision_updates_in_place() {
    let fx = Fixture::new();
    fx.seed_installed("M1", &revision("R1"), InstallStatus::Installing, None);
    let info = mod_info("M1", revision("R1"), false);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(info.clone()));
    let mut source = MockDownloadSource::new();
    serve_archives(&mut source);

    fx.tasks(catalogue, source)
        .install("M1", Some("R1"), false)
        .await
        .unwrap();

    let (row, _) = fx.db.installed_revision("M1").unwrap().unwrap();
    assert_eq!(row.status, InstallStatus::Installed);
    assert!(row.path.is_some());
}

#[tokio::test]
async fn missing_install_folders_stop_before_any_work() {
    let mut fx = Fixture::new();
    let mut settings = fx.settings();
    settings.roots = None;

    let err = fx
        .tasks_with(MockCatalogue::new(), MockDownloadSource::new(), settings)
        .install("M1", Some("R1"), true)
        .await
        .unwrap_err();

    assert_eq!(code_of(&err), ErrorCode::NoPathConfiguration);
    assert!(fx.db.get_mod("M1").unwrap().is_none());
    let messages = fx.drain();
    assert_eq!(states(&messages, "M1"), vec![OpState::Error]);
    assert_eq!(
        last_on(&messages, "M1").payload.operation.as_ref().unwrap().code(),
        Some("no_path_configuration")
    );
}

#[tokio::test]
async fn unknown_revision_is_reported() {
    let mut fx = Fixture::new();
    let info = mod_info("M1", revision("R1"), false);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(info.clone()));
    catalogue
        .expect_mod_revisions()
        .times(1)
        .returning(|_| Ok((revision("R1"), vec![revision("R2")])));

    let err = fx
        .tasks(catalogue, MockDownloadSource::new())
        .install("M1", Some("R9"), true)
        .await
        .unwrap_err();

    assert_eq!(code_of(&err), ErrorCode::RevisionNotFound);
    assert!(fx.db.get_mod("M1").unwrap().is_none());
    let messages = fx.drain();
    let op = last_on(&messages, "M1").payload.operation.clone().unwrap();
    assert_eq!(op.data["message"], "Revision not found: R9");
}

#[tokio::test]
async fn older_revision_is_found_among_others() {
    let fx = Fixture::new();
    let info = mod_info("M1", revision("R2"), false);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(info.clone()));
    catalogue
        .expect_mod_revisions()
        .returning(|_| Ok((revision("R2"), vec![revision("R1")])));
    let mut source = MockDownloadSource::new();
    serve_archives(&mut source);

    fx.tasks(catalogue, source)
        .install("M1", Some("R1"), false)
        .await
        .unwrap();

    let (row, _) = fx.db.installed_revision("M1").unwrap().unwrap();
    assert_eq!(row.revision_id, "R1");
}

#[tokio::test]
async fn failed_download_rolls_back_the_checkpoint() {
    let mut fx = Fixture::new();
    let info = mod_info("M1", revision("R1"), false);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(info.clone()));
    let mut source = MockDownloadSource::new();
    source
        .expect_resolve_url()
        .returning(|_| Ok(UrlResolution::Url("https://cdn.example.com/R1.zip".into())));
    source
        .expect_fetch()
        .times(1)
        .returning(|_, _, _, _| Ok(FetchOutcome::HttpError(503)));

    let err = fx
        .tasks(catalogue, source)
        .install("M1", Some("R1"), false)
        .await
        .unwrap_err();

    assert_eq!(code_of(&err), ErrorCode::HttpError);
    assert!(fx.db.installed_revision("M1").unwrap().is_none());

    let messages = fx.drain();
    let last = last_on(&messages, "M1");
    let op = last.payload.operation.as_ref().unwrap();
    assert_eq!(op.code(), Some("http_error"));
    assert_eq!(op.data["http_code"], 503);
    assert!(!last.payload.installing);
    assert!(last.payload.installed.is_none());
}

#[tokio::test]
async fn corrupt_archive_is_a_zip_error() {
    let fx = Fixture::new();
    let info = mod_info("M1", revision("R1"), false);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(info.clone()));
    let mut source = MockDownloadSource::new();
    source
        .expect_resolve_url()
        .returning(|_| Ok(UrlResolution::Url("https://cdn.example.com/R1.zip".into())));
    source.expect_fetch().returning(|_, dir, _, _| {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join("R1.zip");
        std::fs::write(&path, b"not a zip").unwrap();
        Ok(FetchOutcome::File(path))
    });

    let err = fx
        .tasks(catalogue, source)
        .install("M1", Some("R1"), false)
        .await
        .unwrap_err();

    assert_eq!(code_of(&err), ErrorCode::ZipError);
    assert!(fx.db.installed_revision("M1").unwrap().is_none());
    assert!(!fx.mods_dir().exists());
}

#[tokio::test]
async fn cached_archive_is_not_downloaded_again() {
    let fx = Fixture::new();
    let r1 = revision("R1");
    let cached = fx.downloads_dir().join("R1.zip");
    write_archive(&cached);
    fx.seed_downloaded("M1", &r1, &cached);
    let info = mod_info("M1", r1, false);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(info.clone()));
    let mut source = MockDownloadSource::new();
    source.expect_resolve_url().times(0);
    source.expect_fetch().times(0);

    fx.tasks(catalogue, source)
        .install("M1", Some("R1"), false)
        .await
        .unwrap();

    assert!(fx.mods_dir().join("R1").join("R1.dll").is_file());
}

#[tokio::test]
async fn stale_cache_entry_is_replaced_by_a_fresh_download() {
    let fx = Fixture::new();
    let r1 = revision("R1");
    fx.seed_downloaded("M1", &r1, &fx.downloads_dir().join("gone.zip"));
    let info = mod_info("M1", r1, false);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(info.clone()));
    let mut source = MockDownloadSource::new();
    source
        .expect_resolve_url()
        .times(1)
        .returning(|_| Ok(UrlResolution::Url("https://cdn.example.com/R1.zip".into())));
    source.expect_fetch().times(1).returning(|url, dir, _, _| {
        let path = dir.join(url.rsplit('/').next().unwrap());
        write_archive(&path);
        Ok(FetchOutcome::File(path))
    });

    fx.tasks(catalogue, source)
        .install("M1", Some("R1"), false)
        .await
        .unwrap();

    let session = fx.db.session().unwrap();
    let cached = session.downloaded_revision("M1", "R1").unwrap().unwrap();
    assert_eq!(PathBuf::from(cached.path), fx.downloads_dir().join("R1.zip"));
}

/// Commit a write on a separate connection that gives up quickly when locked
fn write_from_another_connection(db_path: &Path, playlist: &str) -> rusqlite::Result<()> {
    let conn = rusqlite::Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_millis(200))?;
    conn.execute("INSERT INTO playlists (name) VALUES (?1)", [playlist])?;
    Ok(())
}

#[tokio::test]
async fn other_writers_are_not_blocked_while_downloading() {
    let fx = Fixture::new();
    let r1 = revision("R1");
    fx.seed_downloaded("M1", &r1, &fx.downloads_dir().join("gone.zip"));
    let info = mod_info("M1", r1, false);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(info.clone()));
    let db_path = fx.dir.path().join("smods.db");
    let mut source = MockDownloadSource::new();
    source
        .expect_resolve_url()
        .returning(|_| Ok(UrlResolution::Url("https://cdn.example.com/R1.zip".into())));
    source.expect_fetch().times(1).returning(move |url, dir, _, _| {
        write_from_another_connection(&db_path, "During download").unwrap();
        let path = dir.join(url.rsplit('/').next().unwrap());
        write_archive(&path);
        Ok(FetchOutcome::File(path))
    });

    fx.tasks(catalogue, source)
        .install("M1", Some("R1"), false)
        .await
        .unwrap();

    let names: Vec<String> = fx
        .db
        .list_playlists()
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert!(names.contains(&"During download".to_string()));
    let session = fx.db.session().unwrap();
    let cached = session.downloaded_revision("M1", "R1").unwrap().unwrap();
    assert_eq!(PathBuf::from(cached.path), fx.downloads_dir().join("R1.zip"));
}

#[tokio::test]
async fn dependency_links_are_staged_after_the_download() {
    let fx = Fixture::new();
    fx.seed_installed("D1", &revision("D1-r"), InstallStatus::Installed, Some("/games/D1"));
    let d1 = mod_info("D1", revision("D1-r"), false);
    let parent = mod_info("M1", revision("M1-r"), true);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(parent.clone()));
    catalogue
        .expect_dependency_tree()
        .returning(move |_| Ok(vec![d1.clone()]));
    let db_path = fx.dir.path().join("smods.db");
    let mut source = MockDownloadSource::new();
    source
        .expect_resolve_url()
        .returning(|rev| Ok(UrlResolution::Url(format!("https://cdn.example.com/{}", rev.filename))));
    source.expect_fetch().times(1).returning(move |url, dir, _, _| {
        write_from_another_connection(&db_path, "Mid install").unwrap();
        let path = dir.join(url.rsplit('/').next().unwrap());
        write_archive(&path);
        Ok(FetchOutcome::File(path))
    });

    fx.tasks(catalogue, source)
        .install("M1", None, true)
        .await
        .unwrap();

    let session = fx.db.session().unwrap();
    assert_eq!(session.dependencies_of("M1").unwrap(), vec!["D1"]);
    assert_eq!(fx.db.list_playlists().unwrap()[0].name, "Mid install");
}

#[tokio::test]
async fn dependencies_are_installed_before_the_dependent_downloads() {
    let mut fx = Fixture::new();
    let d1 = mod_info("D1", revision("D1-r"), false);
    let d2 = mod_info("D2", revision("D2-r"), false);
    let parent = mod_info("M1", revision("M1-r"), true);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .times(1)
        .returning(move |_| Ok(parent.clone()));
    catalogue
        .expect_dependency_tree()
        .times(1)
        .returning(move |_| Ok(vec![d1.clone(), d2.clone()]));

    let fetched = Arc::new(Mutex::new(Vec::new()));
    let fetched_log = fetched.clone();
    let db = fx.db.clone();
    let mut source = MockDownloadSource::new();
    source
        .expect_resolve_url()
        .returning(|rev| Ok(UrlResolution::Url(format!("https://cdn.example.com/{}", rev.filename))));
    source.expect_fetch().returning(move |url, dir, _, _| {
        let name = url.rsplit('/').next().unwrap().to_string();
        if name == "M1-r.zip" {
            for dep in ["D1", "D2"] {
                let (row, _) = db.installed_revision(dep).unwrap().unwrap();
                assert_eq!(row.status, InstallStatus::Installed);
            }
        }
        let path = dir.join(&name);
        write_archive(&path);
        fetched_log.lock().unwrap().push(name);
        Ok(FetchOutcome::File(path))
    });

    fx.tasks(catalogue, source)
        .install("M1", None, true)
        .await
        .unwrap();

    assert_eq!(
        *fetched.lock().unwrap(),
        vec!["D1-r.zip", "D2-r.zip", "M1-r.zip"]
    );
    let session = fx.db.session().unwrap();
    assert_eq!(session.dependencies_of("M1").unwrap(), vec!["D1", "D2"]);

    let messages = fx.drain();
    let parent_states = states(&messages, "M1");
    assert_eq!(
        &parent_states[..4],
        &[
            OpState::GetModInfo,
            OpState::GetDependencies,
            OpState::InstallingDependency,
            OpState::InstallingDependency,
        ]
    );
    assert_eq!(states(&messages, "D1").last(), Some(&OpState::Done));
    assert_eq!(states(&messages, "D2").last(), Some(&OpState::Done));
}

#[tokio::test]
async fn installed_dependencies_are_linked_but_skipped() {
    let fx = Fixture::new();
    fx.seed_installed("D1", &revision("D1-r"), InstallStatus::Installed, Some("/games/D1"));
    let d1 = mod_info("D1", revision("D1-r"), false);
    let parent = mod_info("M1", revision("M1-r"), true);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(parent.clone()));
    catalogue
        .expect_dependency_tree()
        .returning(move |_| Ok(vec![d1.clone()]));
    let mut source = MockDownloadSource::new();
    serve_archives(&mut source);

    fx.tasks(catalogue, source)
        .install("M1", None, true)
        .await
        .unwrap();

    let session = fx.db.session().unwrap();
    assert_eq!(session.dependencies_of("M1").unwrap(), vec!["D1"]);
    let (d1_row, _) = fx.db.installed_revision("D1").unwrap().unwrap();
    assert_eq!(d1_row.path.as_deref(), Some("/games/D1"));
}

#[tokio::test]
async fn failing_dependency_fails_and_rolls_back_the_parent() {
    let mut fx = Fixture::new();
    let d1 = mod_info("D1", revision("D1-r"), false);
    let parent = mod_info("M1", revision("M1-r"), true);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(parent.clone()));
    catalogue
        .expect_dependency_tree()
        .returning(move |_| Ok(vec![d1.clone()]));
    let mut source = MockDownloadSource::new();
    source
        .expect_resolve_url()
        .times(1)
        .returning(|_| Ok(UrlResolution::HttpError(404)));

    let err = fx
        .tasks(catalogue, source)
        .install("M1", None, true)
        .await
        .unwrap_err();

    assert_eq!(code_of(&err), ErrorCode::Exception);
    assert!(fx.db.installed_revision("M1").unwrap().is_none());
    assert!(fx.db.installed_revision("D1").unwrap().is_none());

    let messages = fx.drain();
    let dep_op = last_on(&messages, "D1").payload.operation.clone().unwrap();
    assert_eq!(dep_op.code(), Some("http_error"));
    let parent_op = last_on(&messages, "M1").payload.operation.clone().unwrap();
    assert_eq!(parent_op.code(), Some("exception"));
    assert_eq!(parent_op.data["dependency"], "D1");
}

#[tokio::test]
async fn dependency_cycle_fails_fast() {
    let mut fx = Fixture::new();
    let parent = mod_info("M1", revision("M1-r"), true);
    let itself = parent.clone();

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .times(1)
        .returning(move |_| Ok(parent.clone()));
    catalogue
        .expect_dependency_tree()
        .returning(move |_| Ok(vec![itself.clone()]));

    let err = fx
        .tasks(catalogue, MockDownloadSource::new())
        .install("M1", None, true)
        .await
        .unwrap_err();

    assert_eq!(code_of(&err), ErrorCode::DependencyCycle);
    assert!(fx.db.installed_revision("M1").unwrap().is_none());
    let messages = fx.drain();
    assert_eq!(
        last_on(&messages, "M1").payload.operation.as_ref().unwrap().code(),
        Some("dependency_cycle")
    );
}

#[tokio::test]
async fn refused_download_waits_for_manual_file() {
    let mut fx = Fixture::new();
    write_archive(&fx.downloads_dir().join("R1.zip"));
    let info = mod_info("M1", revision("R1"), false);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(info.clone()));
    let mut source = MockDownloadSource::new();
    source
        .expect_resolve_url()
        .returning(|_| Ok(UrlResolution::AuthDenied));
    source.expect_fetch().times(0);

    fx.tasks(catalogue, source)
        .install("M1", Some("R1"), false)
        .await
        .unwrap();

    let messages = fx.drain();
    let wait = messages
        .iter()
        .filter_map(|m| m.payload.operation.as_ref())
        .find(|op| op.state == OpState::WaitForFile)
        .expect("wait_for_file published");
    assert_eq!(wait.data["timeout"], 0);
    assert_eq!(
        wait.data["download_folder"],
        &*fx.downloads_dir().to_string_lossy()
    );
    assert!(fx.mods_dir().join("R1").is_dir());
}

#[tokio::test]
async fn manual_download_timeout_rolls_back() {
    let fx = Fixture::new();
    let info = mod_info("M1", revision("R1"), false);

    let mut catalogue = MockCatalogue::new();
    catalogue
        .expect_base_mod()
        .returning(move |_| Ok(info.clone()));
    let mut source = MockDownloadSource::new();
    source
        .expect_resolve_url()
        .returning(|_| Ok(UrlResolution::Url("https://cdn.example.com/R1.zip".into())));
    source
        .expect_fetch()
        .returning(|_, _, _, _| Ok(FetchOutcome::AuthDenied));

    let err = fx
        .tasks(catalogue, source)
        .install("M1", Some("R1"), false)
        .await
        .unwrap_err();

    assert_eq!(code_of(&err), ErrorCode::Timeout);
    assert!(fx.db.installed_revision("M1").unwrap().is_none());
}

#[tokio::test]
async fn uninstall_removes_folder_and_row() {
    let mut fx = Fixture::new();
    let folder = fx.mods_dir().join("R1");
    std::fs::create_dir_all(folder.join("data")).unwrap();
    std::fs::write(folder.join("data").join("R1.dll"), b"payload").unwrap();
    fx.seed_installed(
        "M1",
        &revision("R1"),
        InstallStatus::Installed,
        folder.to_str(),
    );

    fx.tasks(MockCatalogue::new(), MockDownloadSource::new())
        .uninstall("M1")
        .await
        .unwrap();

    assert!(!folder.exists());
    assert!(fx.db.installed_revision("M1").unwrap().is_none());
    let messages = fx.drain();
    assert_eq!(
        states(&messages, "M1"),
        vec![
            OpState::GetModInfo,
            OpState::RemoveFolder,
            OpState::RemoveDatabaseEntry,
            OpState::Done,
        ]
    );
    assert!(last_on(&messages, "M1").payload.installed.is_none());
}

#[tokio::test]
async fn uninstalling_a_mod_that_is_not_installed_changes_nothing() {
    let mut fx = Fixture::new();
    fx.seed_mod("M1");
    let bystander = fx.mods_dir().join("Other");
    std::fs::create_dir_all(&bystander).unwrap();

    let err = fx
        .tasks(MockCatalogue::new(), MockDownloadSource::new())
        .uninstall("M1")
        .await
        .unwrap_err();

    assert_eq!(code_of(&err), ErrorCode::ModNotInstalled);
    assert!(fx.db.get_mod("M1").unwrap().is_some());
    assert!(bystander.is_dir());
    let messages = fx.drain();
    let op = last_on(&messages, "M1").payload.operation.clone().unwrap();
    assert_eq!(op.code(), Some("mod_not_installed"));
    assert_eq!(op.data["message"], "No installed revision for Mod: M1");
}

#[tokio::test]
async fn uninstalling_an_unknown_mod_is_reported() {
    let fx = Fixture::new();

    let err = fx
        .tasks(MockCatalogue::new(), MockDownloadSource::new())
        .uninstall("nope")
        .await
        .unwrap_err();

    assert_eq!(code_of(&err), ErrorCode::ModNotFound);
}
