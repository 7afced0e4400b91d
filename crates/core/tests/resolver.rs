//! Build reference classification

mod common;

use std::path::Path;

use common::{linux_install, write_exe, FakeExtractor, FakeFetcher, APPLICATION_INI};
use iris_core::{exit_code, BuildPlatform, IrisError, Provenance, Resolver};

fn resolver(fetcher: &FakeFetcher, extractor: &FakeExtractor, host: Option<BuildPlatform>) -> Resolver {
    Resolver::new(Box::new(fetcher.clone()), Box::new(extractor.clone())).with_host(host)
}

fn build_tree(root: &Path, obj_dirs: &[&str]) {
    std::fs::write(root.join("mach"), b"#!/usr/bin/env python\n").unwrap();
    for obj in obj_dirs {
        let bin = root.join(obj).join("dist/bin");
        write_exe(&bin.join("firefox"));
        std::fs::write(bin.join("application.ini"), APPLICATION_INI).unwrap();
    }
}

#[tokio::test]
async fn installation_directory_is_used_in_place() {
    let work = tempfile::tempdir().unwrap();
    let install = tempfile::tempdir().unwrap();
    linux_install(install.path());
    let reference = install.path().to_string_lossy().into_owned();

    let fetcher = FakeFetcher::default();
    let extractor = FakeExtractor::default();
    let candidate = resolver(&fetcher, &extractor, Some(BuildPlatform::Linux64))
        .resolve(&reference, work.path(), "en-US")
        .await
        .unwrap();

    assert_eq!(candidate.provenance, Provenance::LocalInstallation);
    assert_eq!(candidate.origin_reference, reference);
    assert_eq!(candidate.version, "68.0a1");
    assert_eq!(candidate.build_id, "20190415094532");
    assert!(candidate.executable_path.is_absolute());
    assert_eq!(fetcher.calls(), 0);
    assert!(extractor.extracted().is_empty());
}

#[tokio::test]
async fn release_id_is_downloaded_then_extracted() {
    let work = tempfile::tempdir().unwrap();
    let unpacked = tempfile::tempdir().unwrap();
    linux_install(unpacked.path());
    let archive = work.path().join("cache/firefox-nightly-en-US-linux64.tar.bz2");

    let fetcher = FakeFetcher::serving(&archive);
    let extractor = FakeExtractor::unpacking_to(unpacked.path());
    let candidate = resolver(&fetcher, &extractor, Some(BuildPlatform::Linux64))
        .resolve("nightly", work.path(), "en-US")
        .await
        .unwrap();

    assert_eq!(candidate.provenance, Provenance::ReleaseDownload);
    assert_eq!(candidate.origin_reference, fetcher.url);
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(extractor.extracted(), vec![archive]);
}

#[tokio::test]
async fn package_file_is_extracted_without_download() {
    let work = tempfile::tempdir().unwrap();
    let unpacked = tempfile::tempdir().unwrap();
    linux_install(unpacked.path());
    let package = work.path().join("firefox-68.0a1.en-US.linux-x86_64.tar.bz2");
    std::fs::write(&package, b"not really bzip2").unwrap();
    let reference = package.to_string_lossy().into_owned();

    let fetcher = FakeFetcher::default();
    let extractor = FakeExtractor::unpacking_to(unpacked.path());
    let candidate = resolver(&fetcher, &extractor, Some(BuildPlatform::Linux64))
        .resolve(&reference, work.path(), "en-US")
        .await
        .unwrap();

    assert_eq!(candidate.provenance, Provenance::LocalArchive);
    assert_eq!(candidate.origin_reference, reference);
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(extractor.extracted(), vec![package]);
}

#[tokio::test]
async fn build_tree_picks_last_object_directory() {
    let work = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    build_tree(tree.path(), &["obj-a", "obj-b"]);

    let fetcher = FakeFetcher::default();
    let extractor = FakeExtractor::default();
    let candidate = resolver(&fetcher, &extractor, Some(BuildPlatform::Linux64))
        .resolve(&tree.path().to_string_lossy(), work.path(), "en-US")
        .await
        .unwrap();

    let canonical_tree = std::fs::canonicalize(tree.path()).unwrap();
    assert_eq!(candidate.provenance, Provenance::LocalBuildTree);
    assert_eq!(
        candidate.executable_path,
        canonical_tree.join("obj-b/dist/bin/firefox")
    );
    assert_eq!(candidate.origin_reference, canonical_tree.to_string_lossy());
    assert!(extractor.extracted().is_empty());
}

#[tokio::test]
async fn build_tree_platform_comes_from_target_triple() {
    let work = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    build_tree(tree.path(), &["obj-i686-pc-linux-gnu"]);

    let candidate = resolver(&FakeFetcher::default(), &FakeExtractor::default(), Some(BuildPlatform::Linux64))
        .resolve(&tree.path().to_string_lossy(), work.path(), "en-US")
        .await
        .unwrap();
    assert_eq!(candidate.platform_tag, BuildPlatform::Linux32);
}

#[tokio::test]
async fn mac_build_tree_finds_app_bundle() {
    let work = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    build_tree(tree.path(), &[]);
    let contents = tree
        .path()
        .join("obj-x86_64-apple-darwin18.7.0/dist/Nightly.app/Contents");
    write_exe(&contents.join("MacOS/firefox"));
    std::fs::create_dir_all(contents.join("Resources")).unwrap();
    std::fs::write(contents.join("Resources/application.ini"), APPLICATION_INI).unwrap();

    let candidate = resolver(&FakeFetcher::default(), &FakeExtractor::default(), Some(BuildPlatform::Osx))
        .resolve(&tree.path().to_string_lossy(), work.path(), "en-US")
        .await
        .unwrap();

    assert_eq!(candidate.provenance, Provenance::LocalBuildTree);
    assert_eq!(candidate.platform_tag, BuildPlatform::Osx);
    assert!(candidate
        .executable_path
        .ends_with("dist/Nightly.app/Contents/MacOS/firefox"));
    assert_eq!(candidate.version, "68.0a1");
}

#[tokio::test]
async fn unbuilt_tree_is_invalid() {
    let work = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    build_tree(tree.path(), &[]);
    std::fs::create_dir_all(tree.path().join("obj-x86_64-pc-linux-gnu")).unwrap();

    let err = resolver(&FakeFetcher::default(), &FakeExtractor::default(), Some(BuildPlatform::Linux64))
        .resolve(&tree.path().to_string_lossy(), work.path(), "en-US")
        .await
        .unwrap_err();
    assert!(matches!(err, IrisError::InvalidBuildTree(_)));
    assert_eq!(err.exit_code(), exit_code::UNRESOLVED_BUILD);
}

#[tokio::test]
async fn unknown_reference_lists_release_ids() {
    let work = tempfile::tempdir().unwrap();
    let err = resolver(&FakeFetcher::default(), &FakeExtractor::default(), Some(BuildPlatform::Linux64))
        .resolve("stable", work.path(), "en-US")
        .await
        .unwrap_err();

    assert!(matches!(err, IrisError::UnknownRelease { .. }));
    assert_eq!(err.exit_code(), 5);
    let message = err.to_string();
    for id in ["nightly", "beta", "devedition", "release", "esr"] {
        assert!(message.contains(id), "{message} should mention {id}");
    }
}

#[tokio::test]
async fn download_failure_exits_negative() {
    let work = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::failing();
    let extractor = FakeExtractor::default();

    let err = resolver(&fetcher, &extractor, Some(BuildPlatform::Win64))
        .resolve("beta", work.path(), "de")
        .await
        .unwrap_err();
    assert!(matches!(err, IrisError::DownloadFailed { .. }));
    assert_eq!(err.exit_code(), exit_code::DOWNLOAD_FAILED);
    assert!(extractor.extracted().is_empty());
}

#[tokio::test]
async fn unknown_host_only_blocks_non_installations() {
    let work = tempfile::tempdir().unwrap();
    let install = tempfile::tempdir().unwrap();
    linux_install(install.path());
    let r = resolver(&FakeFetcher::default(), &FakeExtractor::default(), None);

    let err = r.resolve("nightly", work.path(), "en-US").await.unwrap_err();
    assert!(matches!(err, IrisError::UnsupportedPlatform { .. }));

    let candidate = r
        .resolve(&install.path().to_string_lossy(), work.path(), "en-US")
        .await
        .unwrap();
    assert_eq!(candidate.provenance, Provenance::LocalInstallation);
}

#[tokio::test]
async fn platform_mismatch_is_only_a_warning() {
    let work = tempfile::tempdir().unwrap();
    let install = tempfile::tempdir().unwrap();
    linux_install(install.path());
    let r = resolver(&FakeFetcher::default(), &FakeExtractor::default(), Some(BuildPlatform::Win64));

    let candidate = r
        .resolve(&install.path().to_string_lossy(), work.path(), "en-US")
        .await
        .unwrap();
    assert_eq!(candidate.platform_tag.family(), iris_core::Platform::Linux);
    assert!(r.check_platform(&candidate, BuildPlatform::Win64));
    assert!(!r.check_platform(&candidate, candidate.platform_tag));
}
