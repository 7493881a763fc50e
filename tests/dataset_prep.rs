//! Dataset preparation: archive extraction, train/val split and folder loading

use flate2::write::GzEncoder;
use flate2::Compression;
use pet_transfer::dataset::{extract_archive, split_dataset, ImageFolderDataset, SplitSettings};
use std::fs::File;
use std::path::Path;

fn settings(val_ratio: f32, max_per_class: Option<usize>) -> SplitSettings {
    SplitSettings {
        class_names: vec!["cat".to_string(), "dog".to_string()],
        val_ratio,
        max_per_class,
        move_files: false,
        seed: 42,
    }
}

fn write_raw_images(dir: &Path, per_class: usize) {
    std::fs::create_dir_all(dir).unwrap();
    for i in 0..per_class {
        std::fs::write(dir.join(format!("cat.{}.jpg", i)), b"c").unwrap();
        std::fs::write(dir.join(format!("dog.{}.jpg", i)), b"d").unwrap();
    }
    std::fs::write(dir.join("bird.0.jpg"), b"b").unwrap();
    std::fs::write(dir.join("readme.txt"), b"r").unwrap();
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn split_creates_class_folders() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = tmp.path().join("raw");
    let data = tmp.path().join("data");
    write_raw_images(&raw, 10);

    let summary = split_dataset(&raw, &data, &settings(0.2, None)).unwrap();

    assert!(!summary.reused_existing);
    assert_eq!(summary.total_train(), 16);
    assert_eq!(summary.total_val(), 4);
    assert_eq!(file_names(&data.join("val/cat")).len(), 2);
    assert_eq!(file_names(&data.join("train/dog")).len(), 8);
    assert!(!data.join("train/bird").exists());
    // copy mode keeps the originals
    assert_eq!(file_names(&raw).len(), 22);
}

#[test]
fn split_is_deterministic() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = tmp.path().join("raw");
    write_raw_images(&raw, 12);

    let a = tmp.path().join("a");
    let b = tmp.path().join("b");
    split_dataset(&raw, &a, &settings(0.25, None)).unwrap();
    split_dataset(&raw, &b, &settings(0.25, None)).unwrap();

    assert_eq!(file_names(&a.join("val/cat")), file_names(&b.join("val/cat")));
    assert_eq!(file_names(&a.join("train/dog")), file_names(&b.join("train/dog")));
}

#[test]
fn split_respects_max_per_class() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = tmp.path().join("raw");
    let data = tmp.path().join("data");
    write_raw_images(&raw, 10);

    let summary = split_dataset(&raw, &data, &settings(0.5, Some(4))).unwrap();

    assert_eq!(summary.per_class["cat"].train, 2);
    assert_eq!(summary.per_class["cat"].val, 2);
}

#[test]
fn existing_split_is_reused() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = tmp.path().join("raw");
    let data = tmp.path().join("data");
    write_raw_images(&raw, 5);

    let first = split_dataset(&raw, &data, &settings(0.2, None)).unwrap();
    let second = split_dataset(&raw, &data, &settings(0.6, None)).unwrap();

    assert!(second.reused_existing);
    assert_eq!(first.per_class, second.per_class);
}

#[test]
fn move_mode_removes_sources() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = tmp.path().join("raw");
    let data = tmp.path().join("data");
    write_raw_images(&raw, 3);

    let mut s = settings(0.0, None);
    s.move_files = true;
    split_dataset(&raw, &data, &s).unwrap();

    assert_eq!(file_names(&raw), vec!["bird.0.jpg", "readme.txt"]);
    assert_eq!(file_names(&data.join("train/cat")).len(), 3);
}

#[test]
fn archive_to_dataset_pipeline() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = tmp.path().join("train.tar.gz");
    {
        let file = File::create(&archive).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for name in ["train/cat.0.jpg", "train/cat.1.jpg", "train/dog.0.jpg", "train/dog.1.jpg"] {
            let data = b"x";
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, &data[..]).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    let images = extract_archive(&archive, &tmp.path().join("raw")).unwrap();
    let data = tmp.path().join("data");
    split_dataset(&images, &data, &settings(0.5, None)).unwrap();

    let classes = vec!["cat".to_string(), "dog".to_string()];
    let val = ImageFolderDataset::from_directory_with_order(&data.join("val"), &classes).unwrap();
    assert_eq!(val.labels(), vec![0, 1]);
    let train = ImageFolderDataset::from_directory_with_order(&data.join("train"), &classes).unwrap();
    assert_eq!(train.class_counts(), vec![1, 1]);
}
