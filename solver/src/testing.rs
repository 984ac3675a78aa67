//! Problem fixtures shared by the unit tests.

/// Tower of Hanoi: three disks on pin `pa`, goal on pin `pc`, a `hand`
/// channel shuttling between the position slots `qa`/`qb`/`qc`.
pub fn hanoi_spec(reset: u8, max_its: usize) -> String {
    format!(
        r#"{{
  "objectTypes": [{{"name": "disk", "properties": ["size"]}}],
  "slotTypes": [
    {{"name": "pin", "numberOfLayers": 3, "ordered": 1, "gradientDesc": ["size"]}},
    {{"name": "pos", "numberOfLayers": 1, "ordered": 0}},
    {{"name": "channel", "numberOfLayers": 1, "ordered": 1}}
  ],
  "handles": [
    {{"name": "take", "initial": "pin", "final": "hand", "modulate": "object"}},
    {{"name": "put", "initial": "hand", "final": "pin", "modulate": "object"}},
    {{"name": "shift", "initial": "pos", "final": "pos", "modulate": "hand"}}
  ],
  "task": {{
    "objects": [
      {{"name": "d1", "type": "disk", "size": 1}},
      {{"name": "d2", "type": "disk", "size": 2}},
      {{"name": "d3", "type": "disk", "size": 3}}
    ],
    "slots": [
      {{"name": "pa", "type": "pin", "holds": [], "score": 1, "pos": "qa", "bound": ["qa"]}},
      {{"name": "pb", "type": "pin", "holds": [], "score": 2, "pos": "qb", "bound": ["qb"]}},
      {{"name": "pc", "type": "pin", "holds": [], "score": 4, "pos": "qc", "bound": ["qc"]}},
      {{"name": "qa", "type": "pos", "holds": [], "score": 0, "bound": []}},
      {{"name": "qb", "type": "pos", "holds": [], "score": 0, "bound": []}},
      {{"name": "qc", "type": "pos", "holds": [], "score": 0, "bound": []}},
      {{"name": "hand", "type": "channel", "holds": [], "score": 8, "bound": ["qa", "qb", "qc"]}}
    ],
    "initial": [{{"name": "pa", "holds": ["d3", "d2", "d1"]}}],
    "final": [{{"name": "pc", "holds": ["d3", "d2", "d1"]}}],
    "constraints": []
  }},
  "simulation": {{
    "reset": {reset}, "maxIts": {max_its},
    "maxMovesInt": 6, "maxMovesIcm": 6, "maxMovesScm": 12,
    "maxRecsLct": 25, "maxRecsInt": 40, "maxRecsIcm": 40,
    "maxTruncsInt": 6, "maxTruncsIcm": 6,
    "probRedoLct": 0.2, "probRedoInt": 0.2, "probRedoIcm": 0.2,
    "sizePattern": 2, "precision": 4
  }}
}}"#
    )
}

/// River crossing: three hobbits and three orcs ferried from the left bank
/// to the right by a two-seat boat; each bank keeps a non-negative `worth`
/// sum (a bank may receive a first lone orc, but never a second one without
/// a hobbit).
pub fn ferry_spec(reset: u8, max_its: usize) -> String {
    format!(
        r#"{{
  "objectTypes": [
    {{"name": "hobbit", "properties": ["worth"]}},
    {{"name": "orc", "properties": ["worth"]}}
  ],
  "slotTypes": [
    {{"name": "pin", "numberOfLayers": 6, "ordered": 0, "noNegSum": ["worth"]}},
    {{"name": "pos", "numberOfLayers": 1, "ordered": 0}},
    {{"name": "channel", "numberOfLayers": 2, "ordered": 0}}
  ],
  "handles": [
    {{"name": "board", "initial": "pin", "final": "boat", "modulate": "object"}},
    {{"name": "land", "initial": "boat", "final": "pin", "modulate": "object"}},
    {{"name": "row", "initial": "pos", "final": "pos", "modulate": "boat"}}
  ],
  "task": {{
    "objects": [
      {{"name": "h1", "type": "hobbit", "worth": 1}},
      {{"name": "h2", "type": "hobbit", "worth": 1}},
      {{"name": "h3", "type": "hobbit", "worth": 1}},
      {{"name": "o1", "type": "orc", "worth": -1}},
      {{"name": "o2", "type": "orc", "worth": -1}},
      {{"name": "o3", "type": "orc", "worth": -1}}
    ],
    "slots": [
      {{"name": "lb", "type": "pin", "holds": [], "score": 1, "pos": "ql", "bound": ["ql"]}},
      {{"name": "rb", "type": "pin", "holds": [], "score": 3, "pos": "qr", "bound": ["qr"]}},
      {{"name": "ql", "type": "pos", "holds": [], "score": 0, "bound": []}},
      {{"name": "qr", "type": "pos", "holds": [], "score": 0, "bound": []}},
      {{"name": "boat", "type": "channel", "holds": [], "score": 5, "bound": ["ql", "qr"]}}
    ],
    "initial": [{{"name": "lb", "holds": ["h1", "h2", "h3", "o1", "o2", "o3"]}}],
    "final": [{{"name": "rb", "holds": ["h1", "h2", "h3", "o1", "o2", "o3"]}}],
    "constraints": []
  }},
  "simulation": {{
    "reset": {reset}, "maxIts": {max_its},
    "maxMovesInt": 8, "maxMovesIcm": 8, "maxMovesScm": 16,
    "maxRecsLct": 25, "maxRecsInt": 40, "maxRecsIcm": 40,
    "maxTruncsInt": 6, "maxTruncsIcm": 6,
    "probRedoLct": 0.2, "probRedoInt": 0.2, "probRedoIcm": 0.2,
    "sizePattern": 2, "precision": 4
  }}
}}"#
    )
}

/// One slot, one object, initial equals final. The run terminates on the
/// first iteration without learning anything.
pub fn identity_spec(max_its: usize) -> String {
    format!(
        r#"{{
  "objectTypes": [{{"name": "token", "properties": []}}],
  "slotTypes": [{{"name": "pin", "numberOfLayers": 1, "ordered": 0}}],
  "handles": [{{"name": "move", "initial": "pin", "final": "pin", "modulate": "object"}}],
  "task": {{
    "objects": [{{"name": "x", "type": "token"}}],
    "slots": [{{"name": "s1", "type": "pin", "holds": ["x"], "score": 1, "bound": []}}],
    "initial": [{{"name": "s1", "holds": ["x"]}}],
    "final": [{{"name": "s1", "holds": ["x"]}}],
    "constraints": []
  }},
  "simulation": {{
    "reset": 1, "maxIts": {max_its},
    "maxMovesInt": 4, "maxMovesIcm": 4, "maxMovesScm": 4,
    "maxRecsLct": 5, "maxRecsInt": 5, "maxRecsIcm": 5,
    "maxTruncsInt": 3, "maxTruncsIcm": 3,
    "probRedoLct": 0.5, "probRedoInt": 0.5, "probRedoIcm": 0.5,
    "sizePattern": 2, "precision": 2
  }}
}}"#
    )
}
