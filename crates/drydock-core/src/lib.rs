//! drydock-core
//!
//! Reconciliation and scheduling engine of the drydock control plane.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, application, build, desired / observed state, errors）
//! - **ports**: 抽象化レイヤー（repositories, Backend, BuildDispatcher, Discoverer, Clock, など）
//! - **cluster**: メンバーシップと jump consistent hash による担当分け
//! - **coalesce**: 同時実行を 1 本にまとめる Coalescer / KeyedCoalescer
//! - **app**: アプリケーションロジック（build scheduler, deployment reconciler, service, builder）
//! - **impls**: 実装（InMemoryStore など開発用）
//! - **tasks**: シャットダウン信号とバックグラウンドタスク

pub mod app;
pub mod cluster;
pub mod coalesce;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod tasks;
