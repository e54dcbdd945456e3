//! The JavaScript prelude that materializes the sandbox globals from the
//! injected `__env` snapshot. Runs once per evaluation, before the user
//! script, inside the same deadline.

pub(crate) const PRELUDE: &str = r#"
"use strict";

const __messages = __env.messages;
const __roster = __env.agents;

globalThis.message = __env.message;
globalThis.agent = __env.agent;

globalThis.cluster = {
    id: __env.cluster.id,
    createdAt: __env.cluster.createdAt,
    getAgent(id) {
        return __roster.find((a) => a.id === id) ?? null;
    },
    getAgentsByRole(role) {
        return __roster.filter((a) => a.role === role);
    },
};

function __filter(f) {
    f = f ?? {};
    let out = __messages.filter((m) =>
        (f.cluster_id === undefined || m.cluster_id === f.cluster_id) &&
        (f.topic === undefined || m.topic === f.topic) &&
        (f.sender === undefined || m.sender === f.sender) &&
        (f.since === undefined || m.timestamp >= f.since) &&
        (f.until === undefined || m.timestamp <= f.until)
    );
    out.sort((a, b) => a.timestamp - b.timestamp || a.id - b.id);
    if (f.limit !== undefined && out.length > f.limit) {
        out = out.slice(out.length - f.limit);
    }
    return out;
}

globalThis.ledger = {
    query(f) {
        return __filter(f);
    },
    findLast(f) {
        const hits = __filter(f);
        return hits.length ? hits[hits.length - 1] : null;
    },
    count(f) {
        return __filter(f).length;
    },
};

globalThis.helpers = {
    allResponded(agents, topic, sinceTs) {
        return (agents ?? []).every((a) => {
            const id = typeof a === "string" ? a : a.id;
            return __messages.some((m) =>
                m.topic === topic &&
                m.sender === id &&
                (sinceTs === undefined || sinceTs === null || m.timestamp >= sinceTs)
            );
        });
    },
    hasConsensus(topic, sinceTs) {
        const hits = __messages.filter((m) =>
            m.topic === topic &&
            (sinceTs === undefined || sinceTs === null || m.timestamp >= sinceTs)
        );
        if (hits.length === 0) {
            return false;
        }
        return hits.every((m) =>
            m.content && m.content.data && m.content.data.approved === true
        );
    },
};

globalThis.console = {
    log() {},
    info() {},
    warn() {},
    error() {},
    debug() {},
};

Date.now = () => __env.now;
"#;
