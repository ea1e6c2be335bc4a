//! # Project Terminology
//!
//! This module documents the terms used throughout nxapi. Most of them come
//! from Nintendo's own apps and APIs.
//!
//! ## Nintendo Services
//!
//! * **Coral**: The internal API family of the Nintendo Switch Online app
//!   (`api-lp1.znc.srv.nintendo.net`). Friend lists, presence, web services and
//!   announcements all come from Coral. See [`crate::coral`].
//!
//! * **Moon**: The internal API family of the Nintendo Switch Parental Controls
//!   app. Not used by nxapi, but its client id shows up in session tokens issued
//!   for that app, which [`crate::oauth::token::validate_session_token`] rejects.
//!
//! * **Nintendo Account**: The account system at `accounts.nintendo.com`. Users
//!   log in there and the app receives a session token.
//!
//! ## Authentication Terms
//!
//! * **Session token**: Long lived Nintendo Account credential, a JWT nxapi can
//!   decode but not verify. It is exchanged for short lived API access and stored
//!   under `NintendoAccountToken.<naId>`.
//!
//! * **Attestation service**: An external, unofficial service that produces the
//!   `f` value Coral requires with every login and web service token request.
//!   nxapi talks to an imink compatible API, see [`crate::oauth::attestation`].
//!
//! * **Coral credential**: The `webApiServerCredential` returned by Coral login.
//!   Kept in the token cache under `NsoToken.<session token>` as a
//!   [`crate::oauth::CachedCredential`] until it expires.
//!
//! * **Proxy token**: A capability scoped bearer token issued by the znc proxy.
//!   It is not a Nintendo credential: the proxy looks up the policy and acts with
//!   the session token of the user that created it. See [`crate::policy`].
//!
//! ## Presence Terms
//!
//! * **Presence**: A user's state (`ONLINE`, `PLAYING`, `INACTIVE`, `OFFLINE`)
//!   plus the title they are playing and its status text (`sysDescription`).
//!
//! * **Online-like / offline-like**: `ONLINE` and `PLAYING` count as online,
//!   everything else as offline. Only a move between the two groups is reported
//!   as a friend coming online or going offline.
//!
//! * **Snapshot**: The current user and friend list as fetched in one poll.
//!   Transitions are always computed between two snapshots, see
//!   [`crate::presence::diff`].
