// src/domain/mod.rs

mod client;

pub use client::{
    //
    MessageClient,
    MessageClientPtr,
    MessageEnvelope,
    SubscriptionHandle,
    Topic,
};
