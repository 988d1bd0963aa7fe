mod common;
use common::*;

use std::collections::HashSet;
use std::time::Duration;

use weft::{merge, pipeline, Channel, State, Transform};

#[tokio::test]
async fn pipe_fans_out_to_every_child() {
  let parent = Channel::new();
  let left = Channel::bounded(4);
  let right = Channel::bounded(4);
  parent.pipe(&[left.clone(), right.clone()]);

  let _ = parent.put(7);
  let _ = parent.put(8);

  assert_eq!(within(left.take()).await, Some(7));
  assert_eq!(within(right.take()).await, Some(7));
  assert_eq!(within(left.take()).await, Some(8));
  assert_eq!(within(right.take()).await, Some(8));
}

#[tokio::test]
async fn pipeline_chains_transforms() {
  let (head, tail) = pipeline(vec![
    Transform::map(|v: i32| Some(v + 1)).into(),
    Transform::map(|v: i32| Some(v * 2)).into(),
  ]);

  let _ = head.put(3);
  assert_eq!(within(tail.take()).await, Some(8));
}

#[tokio::test]
async fn pipeline_splices_existing_channels() {
  let middle = Channel::bounded(2);
  let (head, tail) = pipeline(vec![
    Transform::map(|v: i32| Some(v + 1)).into(),
    middle.clone().into(),
    Transform::map(|v: i32| Some(-v)).into(),
  ]);
  assert!(!middle.same_channel(&head));
  assert!(!tail.same_channel(&head));

  let _ = head.put(1);
  assert_eq!(within(tail.take()).await, Some(-2));
}

#[tokio::test]
async fn merge_collects_from_all_parents() {
  let a = Channel::new();
  let b = Channel::new();
  let merged = merge(&[a.clone(), b.clone()]);

  let _ = a.put(1);
  let _ = b.put(2);

  let first = within(merged.take()).await.unwrap();
  let second = within(merged.take()).await.unwrap();
  let arrived: HashSet<i32> = [first, second].into_iter().collect();
  assert_eq!(arrived, HashSet::from([1, 2]));
}

#[tokio::test]
async fn close_all_propagates_through_pipeline() {
  let parent = Channel::from_iter([1, 2, 3], false);
  let child = Channel::bounded(3);
  parent.pipe(&[child.clone()]);

  assert_eq!(within(child.to_vec()).await, vec![1, 2, 3]);
  within(child.done()).await;
  assert_eq!(child.state(), State::Ended);
}

#[tokio::test]
async fn plain_close_leaves_children_open() {
  let parent = Channel::new();
  let child = Channel::new();
  parent.pipe(&[child.clone()]);

  let _ = parent.put(1);
  assert_eq!(within(child.take()).await, Some(1));

  parent.close();
  within(parent.done()).await;
  assert_eq!(child.state(), State::Open);
}

#[tokio::test]
async fn unpipe_stops_forwarding() {
  let parent = Channel::new();
  let child = Channel::new();
  parent.pipe(&[child.clone()]);

  let _ = parent.put(1);
  assert_eq!(within(child.take()).await, Some(1));

  // Let the forwarding loop park on its next take before detaching.
  weft::timeout(Duration::from_millis(20)).await;
  parent.unpipe(&[child.clone()]);

  // The loop's in-flight take swallows one value on its way out; nothing
  // further is forwarded.
  let _ = parent.put(2);
  let _ = parent.put(3);
  assert_eq!(within(parent.take()).await, Some(3));

  let mut starved = child.take();
  assert_pending(&mut starved).await;
}

#[tokio::test]
async fn map_derives_transformed_channel() {
  let source = Channel::from_iter([1, 2, 3], false);
  let doubled = source.map(|v: i32| v * 2);

  assert_eq!(within(doubled.to_vec()).await, vec![2, 4, 6]);
  within(doubled.done()).await;
}
