//! End-to-end scenarios over the synchronous engine.

use canvas_core::schema::{self, AssetCatalog, AssetRecord, MAX_ELEMENTS};
use canvas_core::{
    parse_prompt, resolve_references, CanvasElement, CanvasState, ElementKey, ElementKind, ImageContent, InputEvent,
    Modifiers, Point, PointerEvent, PointerPhase, Rect, Scene, SyncStatus,
};
use proptest::prelude::*;

fn image(name: &str, src: &str, rect: Rect) -> CanvasElement {
    CanvasElement::with_key(
        ElementKey::from_string(name),
        ElementKind::Image(ImageContent::from_src(src)),
        rect,
    )
}

fn pointer(phase: PointerPhase, p: Point, modifiers: Modifiers) -> InputEvent {
    InputEvent::Pointer(PointerEvent::new(phase, p.x, p.y, modifiers))
}

#[test]
fn test_mentions_follow_text_order_not_click_order() {
    let mut state = CanvasState::new(1280.0, 800.0);
    let first = state
        .scene
        .insert(image("first", "https://cdn.example.com/1.png", Rect::new(0.0, 0.0, 100.0, 100.0)))
        .expect("insert");
    let second = state
        .scene
        .insert(image("second", "https://cdn.example.com/2.png", Rect::new(300.0, 0.0, 100.0, 100.0)))
        .expect("insert");
    assert_eq!(state.scene.ensure_ref_id(&first).expect("ref"), 1);
    assert_eq!(state.scene.ensure_ref_id(&second).expect("ref"), 2);

    // Click the second image, then add the first.
    state.process_event(&pointer(PointerPhase::Down, Point::new(350.0, 50.0), Modifiers::none()));
    state.process_event(&pointer(PointerPhase::Up, Point::new(350.0, 50.0), Modifiers::none()));
    state.process_event(&pointer(PointerPhase::Down, Point::new(50.0, 50.0), Modifiers::additive()));
    state.process_event(&pointer(PointerPhase::Up, Point::new(50.0, 50.0), Modifiers::additive()));
    assert_eq!(state.selection.keys(), [second.clone(), first.clone()]);

    let parsed = parse_prompt("@img1 and @img2 combined").expect("parse");
    let refs = resolve_references(&state.scene, &parsed.references).expect("resolve");
    assert_eq!(refs, vec![first, second]);
}

#[test]
fn test_encode_skips_unsaved_local_image() {
    let mut scene = Scene::new();
    scene
        .insert(image("local", "data:image/png;base64,AAAA", Rect::new(0.0, 0.0, 10.0, 10.0)))
        .expect("insert");
    scene
        .insert(image("hosted", "https://cdn.example.com/h.png", Rect::new(20.0, 0.0, 10.0, 10.0)))
        .expect("insert");

    let doc = schema::encode(&scene);
    assert_eq!(doc.meta.skipped_local_only_count, 1);
    assert_eq!(doc.elements.len(), 1);
    let json = doc.to_value().expect("json");
    assert_eq!(json["meta"]["skippedLocalOnlyCount"], 1);
}

#[test]
fn test_rigid_multi_drag_moves_only_selection() {
    let mut state = CanvasState::new(1280.0, 800.0);
    state.viewport.set(2.0, Point::new(40.0, 40.0));
    let rects = [
        Rect::new(0.0, 0.0, 50.0, 50.0),
        Rect::new(100.0, 0.0, 50.0, 50.0),
        Rect::new(0.0, 100.0, 50.0, 50.0),
        Rect::new(300.0, 300.0, 50.0, 50.0),
    ];
    for (i, rect) in rects.iter().enumerate() {
        state
            .scene
            .insert(image(&format!("e{i}"), "https://cdn.example.com/e.png", *rect))
            .expect("insert");
    }
    state
        .selection
        .replace(vec![ElementKey::from_string("e0"), ElementKey::from_string("e1"), ElementKey::from_string("e2")]);

    let press = state.viewport.world_to_screen(Point::new(25.0, 25.0));
    let release = state.viewport.world_to_screen(Point::new(35.0, 20.0));
    state.process_event(&pointer(PointerPhase::Down, press, Modifiers::none()));
    state.process_event(&pointer(PointerPhase::Move, release, Modifiers::none()));
    state.process_event(&pointer(PointerPhase::Up, release, Modifiers::none()));

    for (i, rect) in rects.iter().enumerate() {
        let el = state.scene.get(&ElementKey::from_string(format!("e{i}"))).expect("element");
        let (dx, dy) = if i < 3 { (10.0, -5.0) } else { (0.0, 0.0) };
        assert!((el.x - (rect.x + dx)).abs() < 1e-9, "e{i} x");
        assert!((el.y - (rect.y + dy)).abs() < 1e-9, "e{i} y");
    }
    assert_eq!(state.selection.len(), 3);
}

fn catalog_image(i: usize) -> (CanvasElement, AssetRecord) {
    let id = format!("asset-{i}");
    let record = AssetRecord {
        id: id.clone(),
        content_hash: format!("sha-{i}"),
        url: format!("https://assets.example.com/{id}.png"),
        width: Some(512),
        height: Some(256),
    };
    let content = ImageContent {
        asset_id: Some(id),
        content_hash: Some(record.content_hash.clone()),
        sync_status: Some(SyncStatus::Synced),
        ..ImageContent::from_src("data:image/png;base64,AAAA")
    };
    #[allow(clippy::cast_precision_loss)]
    let rect = Rect::new(i as f64 * 30.0, 0.0, 20.0, 10.0);
    let el = CanvasElement::with_key(ElementKey::from_string(format!("img-{i}")), ElementKind::Image(content), rect);
    (el, record)
}

proptest! {
    #[test]
    fn prop_round_trip_preserves_catalog_elements_in_order(
        n in 0usize..MAX_ELEMENTS,
        order_seed in any::<u64>(),
    ) {
        let (elements, records): (Vec<_>, Vec<_>) = (0..n).map(catalog_image).unzip();
        let mut scene = Scene::from_elements(elements, 1);
        // Shuffle z-order deterministically.
        let keys: Vec<_> = scene
            .elements()
            .iter()
            .enumerate()
            .filter(|(i, _)| (order_seed >> (i % 64)) & 1 == 1)
            .map(|(_, el)| el.key.clone())
            .collect();
        scene.bring_to_front(&keys);

        let catalog = AssetCatalog::new(records);
        let out = schema::decode(schema::encode(&scene), &catalog);
        prop_assert!(!out.rebuilt_from_catalog);
        prop_assert_eq!(out.missing_assets, 0);
        let before: Vec<_> = scene.elements().iter().map(|el| el.key.clone()).collect();
        let after: Vec<_> = out.scene.elements().iter().map(|el| el.key.clone()).collect();
        prop_assert_eq!(before, after);
        for el in out.scene.elements() {
            let img = el.image().expect("image");
            prop_assert!(img.src.starts_with("https://assets.example.com/"));
        }
    }
}
