use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;

use vpm_core::config::FetchConfig;
use vpm_core::{Catalog, Error, ImageEmbedder, PipelineRecord, Product, ProductId, Threshold};
use vpm_embed::FakeEmbedder;
use vpm_media::ImageResolver;
use vpm_search::MatcherService;

const DIM: usize = 64;

fn solid(rgb: [u8; 3]) -> DynamicImage { DynamicImage::ImageRgb8(RgbImage::from_pixel(24, 24, Rgb(rgb))) }

fn halves(left: [u8; 3], right: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(24, 24, |x, _| if x < 12 { Rgb(left) } else { Rgb(right) }))
}

/// Catalog of three products embedded with the fake embedder.
fn catalog(images: &[DynamicImage]) -> Catalog {
    let embedder = FakeEmbedder::new(DIM);
    let mut products = Vec::new();
    let mut records = Vec::new();
    for (i, img) in images.iter().enumerate() {
        let id = ProductId::Int(i as i64 + 1);
        products.push(Product { id: id.clone(), name: format!("Item {}", i + 1), image_reference: format!("/{}.png", i + 1) });
        records.push(PipelineRecord { id, embedding: embedder.embed_image(img).unwrap() });
    }
    Catalog::from_parts(products, records).unwrap()
}

fn service(root: &Path, catalog: Catalog) -> MatcherService {
    MatcherService::new(catalog, Box::new(FakeEmbedder::new(DIM)), ImageResolver::new(root, &FetchConfig::default())).unwrap()
}

fn images() -> Vec<DynamicImage> {
    vec![solid([220, 20, 20]), solid([20, 20, 220]), halves([220, 20, 20], [20, 20, 220])]
}

#[test]
fn identical_image_ranks_first_with_full_similarity() {
    let tmp = tempfile::tempdir().unwrap();
    let svc = service(tmp.path(), catalog(&images()));

    let results = svc.search_image(&solid([220, 20, 20]), Threshold::NONE).unwrap();
    assert_eq!(results[0].product().id, ProductId::Int(1));
    assert!((results[0].similarity - 1.0).abs() < 1e-5);
    assert!(results.windows(2).all(|w| w[0].similarity >= w[1].similarity));

    let exact = svc.search_image(&solid([220, 20, 20]), Threshold::from_percent(100.0).unwrap()).unwrap();
    assert_eq!(exact.len(), 1);
}

#[test]
fn partial_match_sits_between_exact_and_unrelated() {
    let tmp = tempfile::tempdir().unwrap();
    let svc = service(tmp.path(), catalog(&images()));
    let results = svc.search_image(&solid([20, 20, 220]), Threshold::NONE).unwrap();
    let ids: Vec<_> = results.iter().map(|r| r.product().id.clone()).collect();
    assert_eq!(ids, vec![ProductId::Int(2), ProductId::Int(3), ProductId::Int(1)]);
}

#[test]
fn bytes_and_references_go_through_decode_and_resolution() {
    let tmp = tempfile::tempdir().unwrap();
    let svc = service(tmp.path(), catalog(&images()));

    let mut png = Vec::new();
    solid([20, 20, 220]).write_to(&mut Cursor::new(&mut png), ImageFormat::Png).unwrap();
    let from_bytes = svc.search_bytes(&png, Threshold::NONE).unwrap();
    assert_eq!(from_bytes[0].product().id, ProductId::Int(2));

    std::fs::write(tmp.path().join("query.png"), &png).unwrap();
    let from_ref = svc.search_reference("/query.png", Threshold::NONE).unwrap();
    assert_eq!(from_ref[0].product().id, ProductId::Int(2));

    assert!(matches!(svc.search_bytes(b"garbage", Threshold::NONE), Err(Error::ImageDecode(_))));
    assert!(matches!(svc.search_reference("/nope.png", Threshold::NONE), Err(Error::ImageNotFound(_))));
}

#[test]
fn catalog_from_another_model_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let tagged = catalog(&images()).with_embedder_id("candle:clip-vit-base-patch32:d512");
    let err = MatcherService::new(tagged, Box::new(FakeEmbedder::new(DIM)), ImageResolver::new(tmp.path(), &FetchConfig::default()))
        .err()
        .unwrap();
    assert!(matches!(err, Error::ModelMismatch { .. }), "{err}");

    let same = catalog(&images()).with_embedder_id(FakeEmbedder::new(DIM).embedder_id());
    assert!(MatcherService::new(same, Box::new(FakeEmbedder::new(DIM)), ImageResolver::new(tmp.path(), &FetchConfig::default())).is_ok());
}

#[test]
fn dimension_disagreement_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let err = MatcherService::new(catalog(&images()), Box::new(FakeEmbedder::new(DIM * 2)), ImageResolver::new(tmp.path(), &FetchConfig::default()))
        .err()
        .unwrap();
    assert!(matches!(err, Error::DimensionMismatch { expected: 64, actual: 128 }));
}
