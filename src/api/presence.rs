//! Read-only inspection of shared presence and room state.

use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::error::Result;
use crate::presence::ClientMeta;
use crate::server::AppState;
use crate::store::StoreError;

#[derive(Debug, Serialize)]
pub struct ClientPresenceResponse {
    pub id: String,
    pub handshaken: bool,
    pub meta: Option<ClientMeta>,
    pub rooms: BTreeSet<String>,
    /// Whether this node holds a handle for the id
    pub local: bool,
}

#[derive(Debug, Serialize)]
pub struct RoomMembersResponse {
    pub room: String,
    pub members: BTreeSet<String>,
}

/// GET /api/v1/clients/{id}
pub async fn get_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClientPresenceResponse>> {
    let store = &state.store;
    if !store.is_handshaken(&id).await? {
        return Err(StoreError::NotHandshaken(id).into());
    }

    let meta = store.presence().client_record(&id).await?;
    let rooms = store.rooms().rooms_of(&id).await?.into_iter().collect();
    let local = store.has_local_client(&id);

    Ok(Json(ClientPresenceResponse {
        id,
        handshaken: true,
        meta,
        rooms,
        local,
    }))
}

/// GET /api/v1/rooms/{room}
pub async fn get_room(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Result<Json<RoomMembersResponse>> {
    let members = state.store.clients(&room).await?.into_iter().collect();
    Ok(Json(RoomMembersResponse { room, members }))
}
