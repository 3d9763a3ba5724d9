use std::path::Path;
use std::sync::Arc;

use login_sources::source::{LdapConfig, PamConfig, SmtpConfig, SourceFile};
use login_sources::store::MemoryStore;
use login_sources::{
    AuthSource, Error, LocalSources, LoginType, Registry, SourceConfig, SourceStore, User, UserStore,
};
use tempfile::TempDir;

fn pam_source(name: &str) -> AuthSource {
    AuthSource::new(
        LoginType::Pam,
        name,
        SourceConfig::Pam(PamConfig {
            service_name: "login".into(),
        }),
    )
    .unwrap()
}

fn write_source(dir: &Path, file: &str, body: &str) {
    std::fs::write(dir.join(file), body).unwrap();
}

fn sample_files(dir: &Path) {
    write_source(
        dir,
        "corp-ldap.conf",
        "id = 101\nname = Corp LDAP\ntype = ldap_bind_dn\nis_activated = true\nis_default = true\n\n\
         [config]\nhost = ldap.corp\nport = 389\nsecurity_protocol = 0\nuser_base = ou=people,dc=corp\n\
         filter = (uid=%s)\nattribute_username = uid\nattribute_mail = mail\n",
    );
    write_source(
        dir,
        "mail.conf",
        "id = 102\nname = Mail\ntype = smtp\nis_activated = false\nis_default = false\n\n\
         [config]\nauth = PLAIN\nhost = smtp.corp\nport = 587\nallowed_domains = corp.example\ntls = true\n",
    );
}

struct Fixture {
    _dir: TempDir,
    dir: std::path::PathBuf,
    store: Arc<MemoryStore>,
    registry: Registry,
}

fn fixture(mirror: bool) -> Fixture {
    let dir = TempDir::new().unwrap();
    sample_files(dir.path());

    let local = Arc::new(LocalSources::load(dir.path(), ".conf").unwrap());
    let store = Arc::new(MemoryStore::new());
    let registry = Registry::new(store.clone(), store.clone(), local).with_mirror_default_config(mirror);

    Fixture {
        dir: dir.path().to_path_buf(),
        _dir: dir,
        store,
        registry,
    }
}

async fn defaults(registry: &Registry) -> Vec<String> {
    registry
        .list()
        .await
        .unwrap()
        .into_iter()
        .filter(|s| s.is_default)
        .map(|s| s.name)
        .collect()
}

#[tokio::test]
async fn list_merges_database_and_files() {
    let f = fixture(false);
    let mut pam = pam_source("System");
    pam.is_activated = true;
    f.registry.create(&mut pam).await.unwrap();

    let names: Vec<String> = f.registry.list().await.unwrap().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["System", "Corp LDAP", "Mail"]);

    let active: Vec<String> = f
        .registry
        .activated_list()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(active, vec!["System", "Corp LDAP"]);
    assert_eq!(f.registry.count().await.unwrap(), 3);
}

#[tokio::test]
async fn duplicate_names_are_refused_across_origins() {
    let f = fixture(false);
    f.registry.create(&mut pam_source("System")).await.unwrap();

    let err = f.registry.create(&mut pam_source("System")).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { ref name } if name == "System"));

    let err = f.registry.create(&mut pam_source("Corp LDAP")).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));
    assert_eq!(f.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn renaming_onto_a_taken_name_is_refused() {
    let f = fixture(false);
    let mut system = pam_source("System");
    let mut other = pam_source("Other");
    f.registry.create(&mut system).await.unwrap();
    f.registry.create(&mut other).await.unwrap();

    system.name = "Mail".into();
    let err = f.registry.update(&mut system).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { ref name } if name == "Mail"));

    system.name = "Other".into();
    assert!(matches!(
        f.registry.update(&mut system).await,
        Err(Error::AlreadyExists { .. })
    ));

    let mut mail = f.registry.get_by_id(102).await.unwrap();
    mail.name = "Corp LDAP".into();
    assert!(matches!(
        f.registry.update(&mut mail).await,
        Err(Error::AlreadyExists { .. })
    ));
    mail.name = "System".into();
    assert!(matches!(
        f.registry.update(&mut mail).await,
        Err(Error::AlreadyExists { .. })
    ));

    let names: Vec<String> = f.registry.list().await.unwrap().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["System", "Other", "Corp LDAP", "Mail"]);
    let file = SourceFile::load(f.dir.join("mail.conf")).unwrap();
    assert_eq!(file.general("name"), Some("Mail"));

    // Keeping its own name is not a clash.
    system.name = "System".into();
    system.is_activated = true;
    f.registry.update(&mut system).await.unwrap();
}

#[tokio::test]
async fn creating_a_default_demotes_files() {
    let f = fixture(false);
    let mut pam = pam_source("System");
    pam.is_default = true;
    f.registry.create(&mut pam).await.unwrap();

    assert_eq!(defaults(&f.registry).await, vec!["System"]);

    // The demotion reached the file as well.
    let file = SourceFile::load(f.dir.join("corp-ldap.conf")).unwrap();
    assert_eq!(file.general("is_default"), Some("false"));
}

#[tokio::test]
async fn at_most_one_default_after_any_update_sequence() {
    let f = fixture(false);
    let mut a = pam_source("A");
    let mut b = pam_source("B");
    f.registry.create(&mut a).await.unwrap();
    f.registry.create(&mut b).await.unwrap();

    a.is_default = true;
    f.registry.update(&mut a).await.unwrap();
    assert_eq!(defaults(&f.registry).await, vec!["A"]);

    let mut mail = f.registry.get_by_id(102).await.unwrap();
    mail.is_default = true;
    f.registry.update(&mut mail).await.unwrap();
    assert_eq!(defaults(&f.registry).await, vec!["Mail"]);

    b.is_default = true;
    f.registry.update(&mut b).await.unwrap();
    assert_eq!(defaults(&f.registry).await, vec!["B"]);

    // Updating a non-default source leaves the default alone.
    let mut ldap = f.registry.get_by_id(101).await.unwrap();
    ldap.is_activated = false;
    f.registry.update(&mut ldap).await.unwrap();
    assert_eq!(defaults(&f.registry).await, vec!["B"]);
}

#[tokio::test]
async fn file_update_is_written_back_and_cached() {
    let f = fixture(false);
    let mut mail = f.registry.get_by_id(102).await.unwrap();
    assert!(mail.origin.is_file());

    mail.name = "Corporate Mail".into();
    mail.is_activated = true;
    mail.config = SourceConfig::Smtp(SmtpConfig {
        auth: "LOGIN".into(),
        host: "smtp2.corp".into(),
        port: 465,
        allowed_domains: "corp.example".into(),
        tls: true,
        skip_verify: true,
    });
    f.registry.update(&mut mail).await.unwrap();

    let cached = f.registry.local().get_by_id(102).unwrap();
    assert_eq!(cached.name, "Corporate Mail");
    assert!(cached.is_activated);

    let reloaded = LocalSources::load(&f.dir, ".conf").unwrap().get_by_id(102).unwrap();
    assert_eq!(reloaded.name, "Corporate Mail");
    assert!(reloaded.is_activated);
    assert_eq!(reloaded.config, mail.config);
}

#[tokio::test]
async fn cleared_service_account_is_not_reloaded() {
    let f = fixture(false);
    write_source(
        &f.dir,
        "svc.conf",
        "id = 103\nname = Service LDAP\ntype = ldap_bind_dn\nis_activated = true\n\n\
         [config]\nhost = ldap.corp\nport = 389\nbind_dn = cn=svc\nbind_password = hunter2\n",
    );
    let registry = Registry::new(
        f.store.clone(),
        f.store.clone(),
        Arc::new(LocalSources::load(&f.dir, ".conf").unwrap()),
    );

    let mut svc = registry.get_by_id(103).await.unwrap();
    let SourceConfig::Ldap(cfg) = &mut svc.config else {
        panic!("expected LDAP settings");
    };
    cfg.bind_dn.clear();
    cfg.bind_password.clear();
    registry.update(&mut svc).await.unwrap();

    let reloaded = LocalSources::load(&f.dir, ".conf").unwrap().get_by_id(103).unwrap();
    let SourceConfig::Ldap(cfg) = reloaded.config else {
        panic!("expected LDAP settings");
    };
    assert_eq!(cfg.bind_dn, "");
    assert_eq!(cfg.bind_password, "");
    assert_eq!(cfg.host, "ldap.corp");
}

#[tokio::test]
async fn mirroring_copies_default_settings_into_other_files() {
    let f = fixture(true);

    let mut ldap = f.registry.get_by_id(101).await.unwrap();
    let SourceConfig::Ldap(cfg) = &mut ldap.config else {
        panic!("expected LDAP settings");
    };
    cfg.host = "ldap2.corp".into();
    f.registry.update(&mut ldap).await.unwrap();

    let mail = SourceFile::load(f.dir.join("mail.conf")).unwrap();
    let section = mail.config_section().unwrap();
    assert_eq!(section.get("host"), Some("ldap2.corp"));
    assert_eq!(mail.general("type"), Some("smtp"));

    // Still an SMTP source after a reload.
    let reloaded = LocalSources::load(&f.dir, ".conf").unwrap().get_by_id(102).unwrap();
    assert!(reloaded.is_smtp());
}

#[tokio::test]
async fn without_mirroring_other_files_keep_their_settings() {
    let f = fixture(false);

    let mut ldap = f.registry.get_by_id(101).await.unwrap();
    ldap.config = SourceConfig::Ldap(LdapConfig {
        host: "ldap2.corp".into(),
        port: 389,
        ..Default::default()
    });
    f.registry.update(&mut ldap).await.unwrap();

    let mail = SourceFile::load(f.dir.join("mail.conf")).unwrap();
    assert_eq!(mail.config_section().unwrap().get("host"), Some("smtp.corp"));
}

#[tokio::test]
async fn delete_is_blocked_while_users_reference_the_source() {
    let f = fixture(false);
    let mut pam = pam_source("System");
    f.registry.create(&mut pam).await.unwrap();

    f.store
        .create_user(&User {
            name: "bob".into(),
            lower_name: "bob".into(),
            login_type: Some(LoginType::Pam),
            login_source: pam.id,
            ..Default::default()
        })
        .await
        .unwrap();

    let err = f.registry.delete(&pam).await.unwrap_err();
    assert!(matches!(err, Error::InUse { id } if id == pam.id));
}

#[tokio::test]
async fn deleting_an_unused_source_removes_it() {
    let f = fixture(false);
    let mut pam = pam_source("System");
    f.registry.create(&mut pam).await.unwrap();

    f.registry.delete(&pam).await.unwrap();

    let names: Vec<String> = f.registry.list().await.unwrap().into_iter().map(|s| s.name).collect();
    assert!(!names.contains(&"System".to_string()));
    assert!(matches!(
        f.registry.get_by_id(pam.id).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn file_sources_cannot_be_deleted() {
    let f = fixture(false);
    let ldap = f.registry.get_by_id(101).await.unwrap();
    assert!(matches!(
        f.registry.delete(&ldap).await,
        Err(Error::ReadOnlySource { id: 101 })
    ));
}

#[tokio::test]
async fn corrupted_row_type_is_reported_not_fatal() {
    let f = fixture(false);
    let mut pam = pam_source("System");
    f.registry.create(&mut pam).await.unwrap();

    let mut row = pam.to_row().unwrap();
    row.kind = 99;
    f.store.update(&row).await.unwrap();

    assert!(matches!(
        f.registry.list().await,
        Err(Error::InvalidSourceType(_))
    ));
}

#[tokio::test]
async fn config_variant_must_match_type_on_create() {
    let f = fixture(false);
    let mut source = pam_source("System");
    source.config = SourceConfig::Smtp(SmtpConfig::default());

    assert!(matches!(
        f.registry.create(&mut source).await,
        Err(Error::InvalidSourceType(_))
    ));
}
