//! End-to-end workspace scenarios against the in-memory backend.

mod common;

use std::time::Duration;

use canvas_client::{JobStatus, MemoryBackend};
use canvas_core::{CanvasElement, ImageStatus, Size, SyncStatus};

use common::{fast_config, image, open};

#[tokio::test(start_paused = true)]
async fn test_prompt_with_size_fills_centered_placeholder() {
    let backend = MemoryBackend::default();
    let ws = open(&backend, fast_config()).await;

    let job = ws
        .submit("a red fox (@size:1024x768)")
        .await
        .expect("submit")
        .remove(0);

    // Before the result lands the placeholder is already on the canvas.
    tokio::time::sleep(Duration::from_millis(1)).await;
    let (rect, center) = ws.store().read(|s| {
        let el = s.scene.elements().first().expect("placeholder");
        (el.rect(), s.viewport.world_center())
    });
    assert!((rect.w - 1024.0).abs() < f64::EPSILON);
    assert!((rect.h - 768.0).abs() < f64::EPSILON);
    assert!((rect.center().x - center.x).abs() < 1e-9);
    assert!((rect.center().y - center.y).abs() < 1e-9);

    let outcome = job.outcome().await;
    assert_eq!(outcome.status, JobStatus::Done);
    assert_eq!(outcome.size, Size::new(1024, 768));
    let img = image(&ws, &outcome.target_key.expect("target"));
    assert_eq!(img.status, ImageStatus::Done);
    assert!(!img.src.is_empty());
    assert_eq!(img.sync_status, Some(SyncStatus::Synced));
    assert_eq!(img.natural_w, Some(1024.0));
}

#[tokio::test(start_paused = true)]
async fn test_finished_result_is_autosaved_with_asset_identity() {
    let backend = MemoryBackend::default();
    let ws = open(&backend, fast_config()).await;

    let outcome = ws.submit("harbor at dawn").await.expect("submit").remove(0).outcome().await;
    assert!(outcome.is_done());
    tokio::time::sleep(Duration::from_secs(1)).await;
    ws.flush().await;

    let saved = backend.saved_scene().expect("saved scene");
    let elements = saved["elements"].as_array().expect("elements");
    assert_eq!(elements.len(), 1);
    assert_eq!(elements[0]["status"], "done");
    assert!(elements[0]["assetId"].is_string());
    assert!(elements[0].get("runId").is_none_or(serde_json::Value::is_null));
}

#[tokio::test(start_paused = true)]
async fn test_reload_restores_scene_and_reference_ids() {
    let backend = MemoryBackend::default();
    let first = open(&backend, fast_config()).await;
    let key = first
        .submit("a lighthouse")
        .await
        .expect("submit")
        .remove(0)
        .outcome()
        .await
        .target_key
        .expect("target");
    let ref_id = first
        .store()
        .update_scene(|scene| scene.ensure_ref_id(&key))
        .expect("ref id");
    first.save_now().await.expect("save");

    let second = open(&backend, fast_config()).await;
    assert_eq!(second.load_report().elements, 1);
    let restored = second.store().read(|s| s.scene.by_ref_id(ref_id).map(|el| el.key.clone()));
    assert_eq!(restored, Some(key.clone()));
    assert_eq!(image(&second, &key).status, ImageStatus::Done);

    // The restored reference id keeps working in prompts.
    let outcome = second
        .submit(&format!("@img{ref_id} at night"))
        .await
        .expect("submit")
        .remove(0)
        .outcome()
        .await;
    assert!(outcome.is_done());
    let runs = backend.runs();
    assert!(runs.last().expect("run").reference_content_hash.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_reload_mid_run_resumes_stream() {
    let backend = MemoryBackend::new(Duration::from_secs(30));
    let first = open(&backend, fast_config()).await;
    let job = first.submit("slow comet").await.expect("submit").remove(0);

    // Let the job reach its stream, then save the placeholder with its run id.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let key = first
        .store()
        .read(|s| s.scene.elements().first().map(|el| el.key.clone()))
        .expect("placeholder");
    assert!(image(&first, &key).run_id.is_some());
    first.save_now().await.expect("save");

    let second = open(&backend, fast_config()).await;
    assert_eq!(second.load_report().resumed, 1);
    assert!(second.store().read(|s| s.scene.get(&key).is_some_and(CanvasElement::is_running)));
    second.wait_resumed().await;
    assert_eq!(image(&second, &key).status, ImageStatus::Done);

    assert!(job.outcome().await.is_done());
}

#[tokio::test(start_paused = true)]
async fn test_failed_generation_keeps_element_with_error() {
    let backend = MemoryBackend::default();
    backend.fail_prompts_containing("forbidden");
    let ws = open(&backend, fast_config()).await;

    let outcome = ws.submit("forbidden fruit").await.expect("submit").remove(0).outcome().await;
    assert_eq!(outcome.status, JobStatus::Error("generation failed".into()));
    let img = image(&ws, &outcome.target_key.expect("target"));
    assert_eq!(img.status, ImageStatus::Error);
    assert_eq!(img.error_message.as_deref(), Some("generation failed"));
    assert_eq!(ws.store().read(|s| s.scene.len()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_prompts_never_exceed_three_streams() {
    let backend = MemoryBackend::new(Duration::from_secs(5));
    let ws = open(&backend, fast_config()).await;

    let mut jobs = Vec::new();
    for i in 0..10 {
        jobs.extend(ws.submit(&format!("tile {i}")).await.expect("submit"));
    }
    for job in jobs {
        assert!(job.outcome().await.is_done());
    }
    assert_eq!(backend.max_active_streams(), 3);

    // Every placeholder got its own free slot.
    let rects: Vec<_> = ws.store().read(|s| s.scene.rects());
    assert_eq!(rects.len(), 10);
    for (i, a) in rects.iter().enumerate() {
        for b in &rects[i + 1..] {
            assert!(!a.intersects(b));
        }
    }
}
