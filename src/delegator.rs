//! Top-level Lua dissector: decodes the message header and hands the payload to
//! the protocol registered for the sender's platform and the message id.

use crate::dissector::{Dissector, Layout, REGISTER_FUNC};
use crate::field::{lua_string, Field, FieldNode, WireType};
use crate::platform::{Endian, Platform};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Registered name of the delegator protocol and its dissector table.
pub const DELEGATOR_NAME: &str = "luastructs";
/// Bytes of header before the payload.
pub const HEADER_SIZE: usize = 8;

const PROTO_VAR: &str = "delegator";
const TABLE_VAR: &str = "dissector_table";
const IDS_VAR: &str = "message_ids";
const MSG_NODE: &str = "msg_node";

pub struct Delegator {
    header: Dissector,
    description: String,
}

impl Delegator {
    /// Header fields: version, platform flag, message id, message length.
    pub fn new(platforms: &[Rc<Platform>]) -> Self {
        let mut header = Dissector::new(
            DELEGATOR_NAME,
            Rc::new(Platform::default_platform()),
            Layout::Sequential,
        );
        let field = |name: &str, wire: WireType, size: usize| Field::new(name, wire, size, 0, Endian::Big);

        header.add_field(FieldNode::Field(field("Version", WireType::Uint8, 1)));
        let mut flags = field("Flags", WireType::Uint8, 1);
        let values: BTreeMap<i64, String> = platforms
            .iter()
            .map(|p| (i64::from(p.flag), p.name.clone()))
            .collect();
        flags.set_list_validation(values, true);
        header.add_field(FieldNode::Field(flags));
        header.add_field(FieldNode::Field(field("Message", WireType::Uint16, 2)));
        header.add_field(FieldNode::Field(field("Message length", WireType::Uint32, 4)));

        Delegator {
            header,
            description: "Lua C Structs".to_string(),
        }
    }

    pub fn header(&self) -> &Dissector {
        &self.header
    }

    fn header_field(&self, index: usize) -> Option<&Field> {
        self.header.children.get(index).and_then(FieldNode::as_field)
    }

    pub fn generate(&mut self) -> String {
        self.header
            .push_children(&["f".to_string()], &[DELEGATOR_NAME.to_string()]);
        let mut data = vec![
            format!("-- Delegator for {} dissectors", DELEGATOR_NAME),
            format!(
                "local {} = DissectorTable.new({}, \"Lua Structs\", ftypes.STRING)",
                TABLE_VAR,
                lua_string(DELEGATOR_NAME)
            ),
            format!(
                "local {} = Proto({}, {})",
                PROTO_VAR,
                lua_string(DELEGATOR_NAME),
                lua_string(&self.description)
            ),
            format!("local {} = {{}}", IDS_VAR),
            String::new(),
            format!("-- ProtoField definitions for: {}", DELEGATOR_NAME),
            format!("local f = {}.fields", PROTO_VAR),
            self.header.definition(None),
            String::new(),
            "-- Register struct dissectors".to_string(),
            format!("function {}(proto, platform, name, id)", REGISTER_FUNC),
            format!("\t{}:add(platform .. \".\" .. name, proto)", TABLE_VAR),
            format!("\tif (id ~= nil) then {}[id] = name end", IDS_VAR),
            "end".to_string(),
            String::new(),
        ];
        data.push(self.dissector_func());
        data.join("\n") + "\n"
    }

    fn dissector_func(&mut self) -> String {
        let offsets = self.header.layout(0);
        let mut data = vec![
            format!("-- Delegator dissector function for {}", DELEGATOR_NAME),
            format!("function {}.dissector(buffer, pinfo, tree)", PROTO_VAR),
            format!("\tlocal subtree = tree:add({}, buffer())", PROTO_VAR),
            format!("\tpinfo.cols.protocol = {}.name", PROTO_VAR),
            format!("\tpinfo.cols.info = {}.description", PROTO_VAR),
        ];
        for (i, (child, at)) in self.header.children.iter_mut().zip(&offsets).enumerate() {
            let code = match child {
                FieldNode::Field(f) if i == 2 => f.code(*at, "subtree", Some(MSG_NODE)),
                other => other.code(*at, "subtree", None),
            };
            data.push(code);
        }

        let (Some(flags), Some(msg)) = (self.header_field(1), self.header_field(2)) else {
            data.push("end".to_string());
            return data.join("\n");
        };
        let flags_table = flags.values_var();
        data.push(flags.store_value("flag_value"));
        data.push(msg.store_value("id_value"));
        data.push(format!("\tif ({}[id_value] == nil) then", IDS_VAR));
        data.push(format!(
            "\t\t{}:add_expert_info(PI_MALFORMED, PI_WARN, \"Unknown message id\")",
            MSG_NODE
        ));
        data.push("\telse".to_string());
        data.push(format!(
            "\t\t{}:append_text(\" (\" .. {}[id_value] .. \")\")",
            MSG_NODE, IDS_VAR
        ));
        data.push("\tend".to_string());
        data.push(format!(
            "\tif ({}[flag_value] ~= nil and {}[id_value] ~= nil) then",
            flags_table, IDS_VAR
        ));
        data.push(format!(
            "\t\tlocal name = {}[flag_value] .. \".\" .. {}[id_value]",
            flags_table, IDS_VAR
        ));
        data.push(format!(
            "\t\t{}:try(name, buffer({}):tvb(), pinfo, tree)",
            TABLE_VAR, HEADER_SIZE
        ));
        data.push("\tend".to_string());
        data.push("end".to_string());
        data.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platforms() -> Vec<Rc<Platform>> {
        ["Win32", "Linux-x86-64"]
            .iter()
            .map(|n| Rc::new(Platform::by_name(n).unwrap()))
            .collect()
    }

    #[test]
    fn header_is_packed() {
        let d = Delegator::new(&platforms());
        assert_eq!(d.header().layout(0), vec![0, 1, 2, 4]);
        assert_eq!(d.header().size(), HEADER_SIZE);
    }

    #[test]
    fn generated_dispatch() {
        let lua = Delegator::new(&platforms()).generate();
        assert!(lua.starts_with("-- Delegator for luastructs dissectors\n"));
        assert!(lua.contains("local dissector_table = DissectorTable.new(\"luastructs\", \"Lua Structs\", ftypes.STRING)"));
        assert!(lua.contains("local delegator = Proto(\"luastructs\", \"Lua C Structs\")"));
        assert!(lua.contains("local f_flags_values = {[1]=\"Win32\", [7]=\"Linux-x86-64\"}"));
        assert!(lua.contains("f.message_length = ProtoField.uint32(\"luastructs.message_length\", \"Message length\")"));
        assert!(lua.contains("function delegator_register_proto(proto, platform, name, id)"));
        assert!(lua.contains("\tlocal msg_node = subtree:add(f.message, buffer(2, 2))"));
        assert!(lua.contains("\tlocal flag_value = buffer(1, 1):uint()"));
        assert!(lua.contains("\tlocal id_value = buffer(2, 2):uint()"));
        assert!(lua.contains("add_expert_info(PI_MALFORMED, PI_WARN, \"Unknown message id\")"));
        assert!(lua.contains("\t\tdissector_table:try(name, buffer(8):tvb(), pinfo, tree)"));
    }
}
