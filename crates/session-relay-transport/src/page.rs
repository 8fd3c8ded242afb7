//! Status page served at `/`.

pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Session Relay - Status</title>
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <script src="https://cdn.jsdelivr.net/npm/qrcodejs@1.0.0/qrcode.min.js"></script>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            color: #ddd;
            font-family: system-ui, sans-serif;
            text-align: center;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        #state { font-size: 18px; margin: 16px 0; }
        #state.ready { color: #4ec9b0; }
        #state.waiting { color: #dcdcaa; }
        #state.down { color: #f48771; }
        #qr {
            display: inline-block;
            padding: 16px;
            background: #fff;
            border-radius: 6px;
        }
        #qr:empty { display: none; }
        .hint { color: #888; font-size: 13px; }
    </style>
</head>
<body>
    <h1>Session Relay</h1>
    <div id="state" class="waiting">Loading...</div>
    <div id="qr"></div>
    <p class="hint" id="hint"></p>

    <script>
        const stateEl = document.getElementById('state');
        const qrEl = document.getElementById('qr');
        const hintEl = document.getElementById('hint');
        let shownCode = null;
        let timer = null;

        function render(data) {
            stateEl.textContent = 'State: ' + data.state;
            stateEl.className = data.state === 'ready'
                ? 'ready'
                : (data.state === 'disconnected' ? 'down' : 'waiting');

            if (data.state === 'ready') {
                qrEl.innerHTML = '';
                shownCode = null;
                hintEl.textContent = 'Connected.';
                clearInterval(timer);
                return;
            }

            if (data.qr && data.qr !== shownCode) {
                qrEl.innerHTML = '';
                new QRCode(qrEl, { text: data.qr, width: 256, height: 256 });
                shownCode = data.qr;
                hintEl.textContent = 'Scan this code with the linked-devices screen of the app.';
            } else if (!data.qr) {
                hintEl.textContent = 'Waiting for a pairing code...';
            }
        }

        async function refresh() {
            try {
                const res = await fetch('/qr');
                render(await res.json());
            } catch (e) {
                stateEl.textContent = 'Relay unreachable';
                stateEl.className = 'down';
            }
        }

        refresh();
        timer = setInterval(refresh, 3000);
    </script>
</body>
</html>
"#;
