//! In-page snapshot script.

/// Script evaluated in the page; returns `{ rootId, map }`.
///
/// Element records carry `tagName`, `xpath`, `attributes`, `children`,
/// visibility/interactivity flags, coordinates, and `highlightIndex` for
/// interactive, visible, top-most elements. Text records carry
/// `type: "TEXT_NODE"`, `text` and `isVisible`.
pub const SNAPSHOT_SCRIPT: &str = r#"
(() => {
  const INTERACTIVE_TAGS = new Set(['a','button','input','select','textarea','details','summary','option','label']);
  const INTERACTIVE_ROLES = new Set(['button','link','checkbox','radio','tab','menuitem','option','switch','textbox','combobox','slider']);
  const SKIP_TAGS = new Set(['script','style','noscript','svg','link','meta','head','template']);
  const map = {};
  let nextId = 0;
  let highlightIndex = 0;

  const xpathOf = (el) => {
    const parts = [];
    for (let cur = el; cur && cur.nodeType === Node.ELEMENT_NODE; cur = cur.parentNode) {
      let idx = 1;
      for (let sib = cur.previousElementSibling; sib; sib = sib.previousElementSibling) {
        if (sib.nodeName === cur.nodeName) idx++;
      }
      parts.unshift(cur.nodeName.toLowerCase() + (idx > 1 ? `[${idx}]` : ''));
    }
    return '/' + parts.join('/');
  };

  const isVisible = (el) => {
    const style = window.getComputedStyle(el);
    return el.offsetWidth > 0 && el.offsetHeight > 0 &&
      style.visibility !== 'hidden' && style.display !== 'none';
  };

  const isInteractive = (el) => {
    const tag = el.tagName.toLowerCase();
    if (el.disabled) return false;
    if (INTERACTIVE_TAGS.has(tag)) return true;
    const role = el.getAttribute('role');
    if (role && INTERACTIVE_ROLES.has(role)) return true;
    if (el.hasAttribute('onclick') || el.getAttribute('contenteditable') === 'true') return true;
    const tabindex = el.getAttribute('tabindex');
    return tabindex !== null && tabindex !== '-1';
  };

  const isTop = (el) => {
    const rect = el.getBoundingClientRect();
    const x = rect.left + rect.width / 2;
    const y = rect.top + rect.height / 2;
    if (x < 0 || y < 0 || x > window.innerWidth || y > window.innerHeight) return true;
    const top = document.elementFromPoint(x, y);
    return top === el || el.contains(top);
  };

  const coords = (rect, dx, dy) => ({
    topLeft: { x: rect.left + dx, y: rect.top + dy },
    topRight: { x: rect.right + dx, y: rect.top + dy },
    bottomLeft: { x: rect.left + dx, y: rect.bottom + dy },
    bottomRight: { x: rect.right + dx, y: rect.bottom + dy },
    center: { x: rect.left + rect.width / 2 + dx, y: rect.top + rect.height / 2 + dy },
    width: rect.width,
    height: rect.height,
  });

  const walk = (node, parentVisible) => {
    if (node.nodeType === Node.TEXT_NODE) {
      const text = node.textContent.trim();
      if (!text) return null;
      const id = String(nextId++);
      map[id] = { type: 'TEXT_NODE', text, isVisible: parentVisible };
      return id;
    }
    if (node.nodeType !== Node.ELEMENT_NODE) return null;
    const tag = node.tagName.toLowerCase();
    if (SKIP_TAGS.has(tag)) return null;

    const id = String(nextId++);
    const visible = isVisible(node);
    const attributes = {};
    for (const attr of node.attributes) attributes[attr.name] = attr.value;
    const rect = node.getBoundingClientRect();
    const inViewport = rect.bottom > 0 && rect.right > 0 &&
      rect.top < window.innerHeight && rect.left < window.innerWidth;
    const interactive = isInteractive(node);
    const top = visible && isTop(node);
    const record = {
      tagName: tag,
      xpath: xpathOf(node),
      attributes,
      children: [],
      isVisible: visible,
      isInteractive: interactive,
      isTopElement: top,
      isInViewport: inViewport,
      shadowRoot: !!node.shadowRoot,
      viewportCoordinates: coords(rect, 0, 0),
      pageCoordinates: coords(rect, window.scrollX, window.scrollY),
      viewport: {
        scrollX: window.scrollX, scrollY: window.scrollY,
        width: window.innerWidth, height: window.innerHeight,
      },
    };
    if (interactive && visible && top) record.highlightIndex = highlightIndex++;
    map[id] = record;

    const kids = node.shadowRoot ? [...node.shadowRoot.childNodes, ...node.childNodes] : node.childNodes;
    for (const child of kids) {
      const childId = walk(child, visible);
      if (childId !== null) record.children.push(childId);
    }
    return id;
  };

  const rootId = walk(document.body, true);
  return { rootId, map };
})()
"#;

/// Pages that have nothing to snapshot
#[must_use]
pub fn is_blank_page(url: &str) -> bool {
    let url = url.trim();
    url.is_empty() || url == "about:blank" || url.starts_with("chrome://newtab")
}
