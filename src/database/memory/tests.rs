use super::*;
use serde_json::json;

fn document(content: &str, embedding: Vec<f32>) -> NewDocument {
    let metadata = match json!({"source": content}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    NewDocument {
        content: content.to_string(),
        metadata,
        embedding: Embedding::new(embedding),
    }
}

fn limit(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).expect("non-zero limit")
}

#[tokio::test]
async fn ids_are_monotonic() {
    let backend = MemoryBackend::new(2, DistanceMetric::L2);
    let first = backend
        .insert(document("a", vec![0.0, 0.0]))
        .await
        .expect("should insert");
    let second = backend
        .insert(document("b", vec![1.0, 1.0]))
        .await
        .expect("should insert");
    assert!(second > first);
    assert_eq!(backend.count().await.expect("should count"), 2);
}

#[tokio::test]
async fn rejects_wrong_dimension() {
    let backend = MemoryBackend::new(3, DistanceMetric::L2);
    let result = backend.insert(document("bad", vec![1.0, 2.0])).await;
    assert!(matches!(result, Err(StoreError::Persistence(_))));
    assert_eq!(backend.count().await.expect("should count"), 0);
}

#[tokio::test]
async fn nearest_orders_by_distance_and_caps_rows() {
    let backend = MemoryBackend::new(2, DistanceMetric::L2);
    for (name, x) in [("far", 10.0), ("near", 1.0), ("middle", 5.0), ("exact", 0.0)] {
        backend
            .insert(document(name, vec![x, 0.0]))
            .await
            .expect("should insert");
    }

    let rows = backend
        .nearest(&Embedding::new(vec![0.0, 0.0]), limit(3))
        .await
        .expect("should search");

    let names: Vec<&str> = rows.iter().map(|r| r.content.as_str()).collect();
    assert_eq!(names, vec!["exact", "near", "middle"]);
    assert_eq!(rows[0].distance, 0.0);
    assert_eq!(rows[2].distance, 5.0);
}

#[tokio::test]
async fn cosine_nan_rows_sort_last() {
    let backend = MemoryBackend::new(2, DistanceMetric::Cosine);
    backend
        .insert(document("zero", vec![0.0, 0.0]))
        .await
        .expect("should insert");
    backend
        .insert(document("aligned", vec![2.0, 0.0]))
        .await
        .expect("should insert");

    let rows = backend
        .nearest(&Embedding::new(vec![1.0, 0.0]), limit(5))
        .await
        .expect("should search");

    assert_eq!(rows[0].content, "aligned");
    assert_eq!(rows[1].content, "zero");
    assert!(rows[1].distance.is_nan());
}

#[tokio::test]
async fn closed_backend_refuses_work() {
    let backend = MemoryBackend::new(2, DistanceMetric::L2);
    backend.close().await;
    backend.close().await;

    assert!(backend.is_closed());
    assert!(matches!(
        backend.insert(document("late", vec![0.0, 0.0])).await,
        Err(StoreError::Closed)
    ));
    assert!(matches!(backend.count().await, Err(StoreError::Closed)));
}
