use std::fs;
use std::path::Path;
use tempfile::TempDir;

use vpm_core::config::{AppConfig, FieldMapping};
use vpm_core::{rank, Catalog, Error, ProductId, Threshold};

fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let p = dir.join(name);
    fs::write(&p, body).unwrap();
    p
}

const PRODUCTS: &str = r#"[
  {"id": 1, "name": "Red Sneaker", "url": "/product-images/red_sneaker_1.jpg", "price": 10},
  {"id": 2, "name": "Blue Mug", "url": "/product-images/blue_mug_2.jpg"},
  {"id": 3, "name": "Green Lamp", "url": "/product-images/green_lamp_3.jpg"},
  {"id": 4, "name": "Orphan Chair", "url": "/product-images/orphan_chair_4.jpg"}
]"#;

const EMBEDDINGS: &str = r#"[
  {"id": 1, "embedding": [1.0, 0.0]},
  {"id": 2, "embedding": [0.0, 1.0]},
  {"id": 3, "embedding": [0.7, 0.7]}
]"#;

#[test]
fn load_joins_by_id_and_drops_missing_vectors() {
    let tmp = TempDir::new().unwrap();
    let products = write(tmp.path(), "products.json", PRODUCTS);
    let embeddings = write(tmp.path(), "embeddings.json", EMBEDDINGS);

    let catalog = Catalog::load(&products, &embeddings, &FieldMapping::default()).expect("load");

    assert_eq!(catalog.len(), 3);
    assert_eq!(catalog.dim(), 2);
    assert_eq!(catalog.dropped(), &[ProductId::Int(4)]);
    assert!(catalog.embedder_id().is_none(), "no manifest, no tag");
    assert_eq!(catalog.get(&ProductId::Int(3)).unwrap().product().name, "Green Lamp");
}

#[test]
fn loaded_catalog_ranks_the_reference_scenario() {
    let tmp = TempDir::new().unwrap();
    let products = write(tmp.path(), "products.json", PRODUCTS);
    let embeddings = write(tmp.path(), "embeddings.json", EMBEDDINGS);
    let catalog = Catalog::load(&products, &embeddings, &FieldMapping::default()).unwrap();

    let results = rank(&[1.0, 0.0], catalog.entries(), Threshold::from_percent(50.0).unwrap()).unwrap();
    let ids: Vec<_> = results.iter().map(|r| r.entry.id().clone()).collect();
    assert_eq!(ids, vec![ProductId::Int(1), ProductId::Int(3)]);
    assert_eq!(format!("{:.2}%", results[1].percent()), "70.71%");
}

#[test]
fn empty_join_is_a_data_load_error() {
    let tmp = TempDir::new().unwrap();
    let products = write(tmp.path(), "products.json", PRODUCTS);
    let embeddings = write(tmp.path(), "embeddings.json", r#"[{"id": 99, "embedding": [1.0]}]"#);
    let err = Catalog::load(&products, &embeddings, &FieldMapping::default()).unwrap_err();
    assert!(matches!(err, Error::DataLoad(_)), "got {err}");
}

#[test]
fn missing_sources_are_data_load_errors() {
    let tmp = TempDir::new().unwrap();
    let embeddings = write(tmp.path(), "embeddings.json", EMBEDDINGS);
    let err = Catalog::load(&tmp.path().join("absent.json"), &embeddings, &FieldMapping::default()).unwrap_err();
    assert!(matches!(err, Error::DataLoad(_)));

    let products = write(tmp.path(), "products.json", PRODUCTS);
    let bad = write(tmp.path(), "bad.json", "[{\"id\": 1, \"embedding\": \"nope\"}]");
    assert!(matches!(Catalog::load(&products, &bad, &FieldMapping::default()), Err(Error::DataLoad(_))));
}

#[test]
fn renamed_field_is_reported_clearly() {
    let tmp = TempDir::new().unwrap();
    let products = write(tmp.path(), "products.json", PRODUCTS);
    let embeddings = write(tmp.path(), "embeddings.json", EMBEDDINGS);
    let fields = FieldMapping { image_reference: "image_path".to_string(), ..FieldMapping::default() };
    let err = Catalog::load(&products, &embeddings, &fields).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("image_path") && msg.contains("fields.image_reference"), "{msg}");
}

#[test]
fn custom_field_mapping_is_honoured() {
    let tmp = TempDir::new().unwrap();
    let products = write(
        tmp.path(),
        "products.json",
        r#"[{"sku": "A-1", "title": "Lamp", "img": "/a.jpg"}, {"sku": "B-2", "title": "Mug", "img": "/b.jpg"}]"#,
    );
    let embeddings = write(tmp.path(), "embeddings.json", r#"[{"id": "B-2", "embedding": [0.5, 0.5, 0.0]}]"#);
    let fields = FieldMapping { id: "sku".into(), name: "title".into(), image_reference: "img".into() };
    let catalog = Catalog::load(&products, &embeddings, &fields).unwrap();
    assert_eq!(catalog.len(), 1);
    assert_eq!(catalog.entries()[0].id(), &ProductId::from("B-2"));
}

#[test]
fn mixed_dimensions_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let products = write(tmp.path(), "products.json", PRODUCTS);
    let embeddings = write(
        tmp.path(),
        "embeddings.json",
        r#"[{"id": 1, "embedding": [1.0, 0.0]}, {"id": 2, "embedding": [0.0, 1.0, 0.0]}]"#,
    );
    let err = Catalog::load(&products, &embeddings, &FieldMapping::default()).unwrap_err();
    assert!(err.to_string().contains("mixes models"), "{err}");
}

#[test]
fn duplicate_product_ids_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let products = write(
        tmp.path(),
        "products.json",
        r#"[{"id": 1, "name": "a", "url": "/a.jpg"}, {"id": 1, "name": "b", "url": "/b.jpg"}]"#,
    );
    let embeddings = write(tmp.path(), "embeddings.json", EMBEDDINGS);
    assert!(matches!(Catalog::load(&products, &embeddings, &FieldMapping::default()), Err(Error::DataLoad(_))));
}

#[test]
fn manifest_tags_catalog_with_embedder() {
    let tmp = TempDir::new().unwrap();
    let products = write(tmp.path(), "products.json", PRODUCTS);
    let embeddings = write(tmp.path(), "embeddings.json", EMBEDDINGS);
    write(
        tmp.path(),
        "embeddings.manifest.json",
        r#"{"embedder_id": "fake:d2", "dim": 2, "generated_at": "2026-01-01T00:00:00Z", "records": 3}"#,
    );
    let catalog = Catalog::load(&products, &embeddings, &FieldMapping::default()).unwrap();
    assert_eq!(catalog.embedder_id(), Some("fake:d2"));
}

#[test]
fn config_layers_toml_over_defaults() {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "config.toml",
        "[data]\nimage_root = \"assets\"\n[fields]\nimage_reference = \"image\"\n[pipeline]\nworkers = 3\n",
    );
    write(tmp.path(), "config.test.toml", "[pipeline]\nworkers = 2\n");

    let config = AppConfig::load_from(tmp.path(), "testing").expect("config");
    assert_eq!(config.pipeline.workers, 2, "env file overrides base file");
    assert_eq!(config.fields.image_reference, "image");
    assert_eq!(config.fields.id, "id", "unspecified keys keep defaults");
    assert_eq!(config.image_root(), tmp.path().join("assets"));
    assert_eq!(config.display.thumbnail_width, 300);
}

#[test]
fn config_validation_rejects_bad_values() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "config.toml", "[display]\njpeg_quality = 0\n");
    assert!(matches!(AppConfig::load_from(tmp.path(), "dev"), Err(Error::InvalidConfig(_))));

    write(tmp.path(), "config.toml", "[fields]\nid = \"url\"\n");
    assert!(matches!(AppConfig::load_from(tmp.path(), "dev"), Err(Error::InvalidConfig(_))));
}
