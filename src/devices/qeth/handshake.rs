//! CM/ULP handshake
//!
//! Each RRH of a TH-framed write is handled on its own. CM and ULP requests
//! carry a PUK whose PUS records are looked up by type; IPA requests are
//! handed to [`super::ipa`]. A request that is malformed, lacks a required
//! PUS, or arrives in the wrong state is dropped without a response.

use std::sync::Arc;

use crate::config::QethConfig;
use crate::host::{self, HostFactory, HostInterface, HostSettings};
use crate::mpc::puk::PukBuilder;
use crate::mpc::{
    proto, puk_type, pus_type, rrh_type, CodecError, MpcMessage, Puk, PusBody, PusRecord, Request,
    LINK_TYPE_ETHERNET, TOKEN_TYPE,
};
use crate::net::Layer;

use super::ipa;
use super::state::{adapter_token, CmState, GroupState, UlpState};
use super::worker::HostSlot;

/// MTU assumed when neither the configuration nor the host reports one
const DEFAULT_MTU: u32 = 1500;

/// Group resources the handshake may touch besides [`GroupState`]
pub struct HandshakeCtx<'a> {
    pub tag: &'a str,
    pub config: &'a QethConfig,
    pub factory: &'a dyn HostFactory,
    pub host: &'a HostSlot,
}

/// Result of one MPC write
#[derive(Debug, Default)]
pub struct Outcome {
    /// Responses for the read device, in order
    pub responses: Vec<(Vec<u8>, &'static str)>,
    /// Addressing changed; the inbound filter must be rebuilt
    pub republish: bool,
}

/// Why a request got no response
#[derive(Debug, thiserror::Error)]
enum Dropped {
    #[error("malformed: {0}")]
    Codec(#[from] CodecError),

    #[error("missing PUS {0:#04x}")]
    MissingPus(u8),

    #[error("not valid in state {0}")]
    State(String),

    #[error("unknown PUK type {0:#04x}")]
    UnknownPuk(u8),

    #[error("unsupported protocol {0:#04x}")]
    Protocol(u8),

    #[error("unknown RRH type {0:#04x}")]
    UnknownRrh(u8),

    #[error("host interface unavailable: {0}")]
    Host(std::io::Error),
}

/// Process every RRH of one TH-framed write
pub fn process_message(ctx: &HandshakeCtx<'_>, state: &mut GroupState, data: &[u8]) -> Outcome {
    let mut out = Outcome::default();
    let msg = match MpcMessage::parse(data) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("{} MPC write dropped: {}", ctx.tag, e);
            return out;
        }
    };

    for req in msg.requests() {
        let req = match req {
            Ok(r) => r,
            Err(e) => {
                log::warn!("{} RRH chain broken: {}", ctx.tag, e);
                break;
            }
        };
        let name = request_name(&req);
        let res = match req.header.rrh_type {
            rrh_type::CM => cm_request(ctx, state, &req, &mut out),
            rrh_type::ULP => ulp_request(ctx, state, &req, &mut out),
            rrh_type::IPA => ipa_request(ctx, state, &req, &mut out),
            other => Err(Dropped::UnknownRrh(other)),
        };
        match res {
            Ok(()) => log::debug!("{} {} (seq {}) handled", ctx.tag, name, req.header.seq),
            Err(why) => log::warn!("{} {} dropped: {}", ctx.tag, name, why),
        }
    }
    out
}

fn request_name(req: &Request<'_>) -> String {
    let stage = match req.header.rrh_type {
        rrh_type::CM => "CM",
        rrh_type::ULP => "ULP",
        rrh_type::IPA => return "IPA".into(),
        _ => return format!("RRH {:#04x}", req.header.rrh_type),
    };
    let kind = req
        .first_data()
        .ok()
        .and_then(|d| Puk::parse(d).ok())
        .map(|p| match p.header.puk_type {
            puk_type::ENABLE => "ENABLE",
            puk_type::DISABLE => "DISABLE",
            puk_type::SETUP => "SETUP",
            puk_type::TAKEDOWN => "TAKEDOWN",
            puk_type::CONFIRM => "CONFIRM",
            puk_type::ACTIVE => "ACTIVE",
            _ => "?",
        })
        .unwrap_or("?");
    format!("{}_{}", stage, kind)
}

fn require<'a>(puk: &Puk<'a>, t: u8) -> Result<PusRecord<'a>, Dropped> {
    puk.find(t)?.ok_or(Dropped::MissingPus(t))
}

fn token_of(rec: &PusRecord<'_>) -> Result<u32, Dropped> {
    rec.body()?.token().ok_or(Dropped::MissingPus(rec.pus_type))
}

fn respond(state: &mut GroupState, out: &mut Outcome, rrh: u8, ack: u32, token: u32, payload: &[u8], tag: &'static str) {
    let proto = state.proto();
    out.responses.push((state.seq.frame(rrh, proto, ack, token, payload), tag));
}

fn cm_request(
    ctx: &HandshakeCtx<'_>,
    state: &mut GroupState,
    req: &Request<'_>,
    out: &mut Outcome,
) -> Result<(), Dropped> {
    let puk = Puk::parse(req.first_data()?)?;
    let ack = req.header.seq;
    let category = puk.header.category;

    match puk.header.puk_type {
        puk_type::ENABLE => {
            if state.cm != CmState::Idle {
                return Err(Dropped::State(format!("{:?}", state.cm)));
            }
            let filter = require(&puk, pus_type::FILTER)?;
            let user = require(&puk, pus_type::USER_DATA)?;
            let PusBody::Filter { proto: wire_proto, token, .. } = filter.body()? else {
                return Err(Dropped::MissingPus(pus_type::FILTER));
            };

            state.tokens.cm_filter = token;
            state.cm = CmState::Enabled;

            let mut b = PukBuilder::new(category, puk_type::ENABLE);
            b.push(&PusBody::Filter { proto: wire_proto, token_type: TOKEN_TYPE, token: adapter_token::CM_FILTER })
                .push_raw(&user);
            let issuer = state.tokens.issuer;
            respond(state, out, rrh_type::CM, ack, issuer, &b.finish(), "CM_ENABLE");
        }
        puk_type::SETUP => {
            if state.cm != CmState::Enabled {
                return Err(Dropped::State(format!("{:?}", state.cm)));
            }
            let conn = require(&puk, pus_type::CONNECTION)?;
            require(&puk, pus_type::PARTNER)?;
            let token = token_of(&conn)?;

            state.tokens.cm_connection = token;
            state.cm = CmState::SetupDone;

            let mut b = PukBuilder::new(category, puk_type::CONFIRM);
            b.push(&PusBody::Connection { token_type: TOKEN_TYPE, token: adapter_token::CM_CONNECTION })
                .push(&PusBody::Partner { token_type: TOKEN_TYPE, token });
            let filter = state.tokens.cm_filter;
            respond(state, out, rrh_type::CM, ack, filter, &b.finish(), "CM_CONFIRM");
        }
        puk_type::TAKEDOWN => {
            if state.cm != CmState::Idle {
                state.cm = CmState::Enabled;
            }
            log::info!("{} CM connection taken down", ctx.tag);
        }
        puk_type::DISABLE => {
            state.cm = CmState::Idle;
            log::info!("{} CM disabled", ctx.tag);
        }
        other => return Err(Dropped::UnknownPuk(other)),
    }
    Ok(())
}

fn ulp_request(
    ctx: &HandshakeCtx<'_>,
    state: &mut GroupState,
    req: &Request<'_>,
    out: &mut Outcome,
) -> Result<(), Dropped> {
    let puk = Puk::parse(req.first_data()?)?;
    let ack = req.header.seq;
    let category = puk.header.category;

    match puk.header.puk_type {
        puk_type::ENABLE => {
            if state.cm != CmState::SetupDone || state.ulp != UlpState::Idle {
                return Err(Dropped::State(format!("{:?}/{:?}", state.cm, state.ulp)));
            }
            let filter = require(&puk, pus_type::FILTER)?;
            let link = require(&puk, pus_type::LINK_LEVEL)?;
            let PusBody::Filter { proto: wire_proto, token, .. } = filter.body()? else {
                return Err(Dropped::MissingPus(pus_type::FILTER));
            };
            let lan_number = match link.body()? {
                PusBody::LinkLevel { lan_number, .. } => lan_number,
                _ => 0,
            };
            let layer = match wire_proto {
                proto::L2 => Layer::Layer2,
                proto::L3 => Layer::Layer3,
                other => return Err(Dropped::Protocol(other)),
            };

            attach_host(ctx, state, layer)?;

            state.tokens.ulp_filter = token;
            state.layer = Some(layer);
            state.reset_addressing();
            state.ulp = UlpState::Enabled;
            out.republish = true;
            log::info!("{} ULP enabled in {} mode, MTU {}", ctx.tag, layer, state.mtu);

            let mut b = PukBuilder::new(category, puk_type::ENABLE);
            b.push(&PusBody::Filter { proto: wire_proto, token_type: TOKEN_TYPE, token: adapter_token::ULP_FILTER })
                .push(&PusBody::LinkLevel {
                    link_type: LINK_TYPE_ETHERNET,
                    lan_number,
                    proto: wire_proto,
                    mtu: state.mtu,
                });
            let conn = state.tokens.cm_connection;
            respond(state, out, rrh_type::ULP, ack, conn, &b.finish(), "ULP_ENABLE");
        }
        puk_type::SETUP => {
            if state.ulp != UlpState::Enabled {
                return Err(Dropped::State(format!("{:?}", state.ulp)));
            }
            let conn = require(&puk, pus_type::CONNECTION)?;
            require(&puk, pus_type::PARTNER)?;
            let token = token_of(&conn)?;
            let devaddr = puk.find(pus_type::DEVICE_ADDR)?;

            state.tokens.ulp_connection = token;
            state.ulp = UlpState::SetupDone;

            let mut b = PukBuilder::new(category, puk_type::CONFIRM);
            b.push(&PusBody::Connection { token_type: TOKEN_TYPE, token: adapter_token::ULP_CONNECTION })
                .push(&PusBody::Partner { token_type: TOKEN_TYPE, token });
            if let Some(rec) = devaddr {
                b.push_raw(&rec);
            }
            let filter = state.tokens.ulp_filter;
            respond(state, out, rrh_type::ULP, ack, filter, &b.finish(), "ULP_CONFIRM");
        }
        puk_type::ACTIVE => {
            if state.ulp != UlpState::SetupDone {
                return Err(Dropped::State(format!("{:?}", state.ulp)));
            }
            require(&puk, pus_type::CONNECTION)?;
            state.ulp = UlpState::Active;
            log::info!("{} ULP connection active", ctx.tag);

            let mut b = PukBuilder::new(category, puk_type::ACTIVE);
            b.push(&PusBody::Connection { token_type: TOKEN_TYPE, token: adapter_token::ULP_CONNECTION });
            let conn = state.tokens.ulp_connection;
            respond(state, out, rrh_type::ULP, ack, conn, &b.finish(), "ULP_ACTIVE");
        }
        puk_type::TAKEDOWN | puk_type::DISABLE => {
            state.ulp = if puk.header.puk_type == puk_type::TAKEDOWN && state.ulp != UlpState::Idle {
                UlpState::Enabled
            } else {
                UlpState::Idle
            };
            if state.layer == Some(Layer::Layer3) {
                if let Some(h) = ctx.host.read().as_ref() {
                    if let Err(e) = h.set_enabled(false) {
                        log::warn!("{} cannot bring {} down: {}", ctx.tag, h.name(), e);
                    }
                }
                state.lan_up = false;
            }
            log::info!("{} ULP now {:?}", ctx.tag, state.ulp);
        }
        other => return Err(Dropped::UnknownPuk(other)),
    }
    Ok(())
}

/// Make sure a host interface of the right kind exists, creating it on
/// first use and replacing it when the layer changed
fn attach_host(ctx: &HandshakeCtx<'_>, state: &mut GroupState, layer: Layer) -> Result<(), Dropped> {
    let mut slot = ctx.host.write();
    if slot.is_some() && state.layer == Some(layer) {
        return Ok(());
    }

    let cfg = ctx.config;
    let settings = HostSettings {
        ifname: cfg.ifname.clone(),
        layer,
        mtu: cfg.mtu,
        mac: cfg.mac,
        ipv4: cfg.ipv4.map(|a| (a, cfg.ipv4_prefix)),
        ipv6: cfg.ipv6.map(|a| (a, cfg.ipv6_prefix)),
    };
    let created: Arc<dyn HostInterface> = host::open(ctx.factory, &settings).map_err(Dropped::Host)?;

    state.mtu = match cfg.mtu {
        Some(m) => m,
        None => created.mtu().unwrap_or(DEFAULT_MTU),
    };
    if cfg.mac.is_none() {
        match created.hw_addr() {
            Ok(mac) if !mac.is_zero() => state.mac = mac,
            _ => {}
        }
    }
    if slot.replace(created).is_some() {
        log::info!("{} host interface replaced for {} mode", ctx.tag, layer);
    }
    Ok(())
}

fn ipa_request(
    ctx: &HandshakeCtx<'_>,
    state: &mut GroupState,
    req: &Request<'_>,
    out: &mut Outcome,
) -> Result<(), Dropped> {
    if state.ulp != UlpState::Active {
        return Err(Dropped::State(format!("{:?}", state.ulp)));
    }
    let data = req.first_data()?;
    let host = ctx.host.read().clone();
    let reply = ipa::process(ctx.tag, state, host.as_deref(), data)?;
    out.republish |= reply.republish;

    let conn = state.tokens.ulp_connection;
    respond(state, out, rrh_type::IPA, req.header.seq, conn, &reply.data, "IPA");
    Ok(())
}
